use std::sync::Arc;

use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::error;
use vaultshop_adapters::{configuration, telemetry, FileSnapshotStore, NebulaClient, SystemBrowser};
use vaultshop_core::cart::{Cart, CartSelection, FamilyChoice, ItemChoice, COIN_TIER_SKUS};
use vaultshop_core::catalog::UNIVERSAL_FAMILY_KEY;
use vaultshop_core::checkout::{BatchEvent, BatchState};
use vaultshop_core::client::ShopClient;
use vaultshop_core::config::Settings;
use vaultshop_core::entities::{BuyPolicy, CatalogItem};
use vaultshop_core::ports::{BrowserOpener, SnapshotStore};

type Client = ShopClient<NebulaClient, NebulaClient, FileSnapshotStore>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Login to the storefront
    Login {
        /// Account email
        #[arg(short, long)]
        username: Option<String>,

        /// Persist the session for auto-login
        #[arg(short, long, default_value = "false")]
        save: bool,
    },

    /// Delete the persisted session
    Logout,

    /// List the asset catalog grouped by heist
    Catalog,

    /// Show wallet balances
    Wallets,

    /// Buy a single item directly, skipping the cart
    Buy {
        /// Item SKU or id
        sku: String,

        /// Quantity to order
        #[arg(short, long, default_value = "1")]
        quantity: u32,
    },

    /// Interactive cart and checkout session
    Shop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _guard = telemetry::init_subscriber("vaultshop_cli", "info");

    let settings = match configuration::get_configuration() {
        Ok(s) => s,
        Err(e) => {
            error!(?e, "failed to load configuration");
            return Err(anyhow::anyhow!("configuration loading failed"));
        }
    };

    let cli = Cli::parse();

    match &cli.command {
        Commands::Login { username, save } => {
            let client = build_client(&settings)?;
            let username = match username {
                Some(u) => u.clone(),
                None => Input::new().with_prompt("Email").interact_text()?,
            };
            let password = rpassword::prompt_password("Password: ")?;

            let creds = client.login(&username, &password, *save).await?;
            println!("Logged in as: {}", creds.display_name);
            if *save {
                println!("Session saved; 'shop' will log in automatically.");
            }
            print_wallets(&client).await;
        }

        Commands::Logout => {
            let store = FileSnapshotStore::default_location();
            store.delete().await?;
            println!("Session cleared.");
        }

        Commands::Catalog => {
            let client = build_client(&settings)?;
            require_session(&client).await?;

            for family in client.catalog().families().await {
                println!("{} ({})", family.display_name, family.key);
                for item in &family.items {
                    println!("  {:<45} {}", item.sku, format_price(item));
                }
            }
            let credits = client.catalog().credit_items().await.unwrap_or_default();
            if !credits.is_empty() {
                println!("Credits");
                for item in &credits {
                    println!("  {:<45} {}", item.sku, format_price(item));
                }
            }
        }

        Commands::Wallets => {
            let client = build_client(&settings)?;
            require_session(&client).await?;
            print_wallets(&client).await;
        }

        Commands::Buy { sku, quantity } => {
            let client = build_client(&settings)?;
            require_session(&client).await?;

            let receipt = client.executor().buy_now(sku, *quantity).await?;
            println!("Order {}: {:?}", receipt.order_no, receipt.status);
            if let Some(url) = &receipt.payment_station_url {
                println!("Complete the payment at: {}", url);
                if let Err(e) = SystemBrowser.open(url) {
                    error!(?e, "could not open the browser");
                }
            }
        }

        Commands::Shop => {
            let client = build_client(&settings)?;
            if client.restore().await?.is_none() {
                println!("No saved session, logging in.");
                let username: String = Input::new().with_prompt("Email").interact_text()?;
                let password = rpassword::prompt_password("Password: ")?;
                let save = Confirm::new()
                    .with_prompt("Stay logged in?")
                    .default(false)
                    .interact()?;
                client.login(&username, &password, save).await?;
            }
            shop_loop(&client).await?;
        }
    }

    Ok(())
}

fn build_client(settings: &Settings) -> anyhow::Result<Arc<Client>> {
    let nebula = Arc::new(NebulaClient::new(&settings.api.base_url)?);
    let snapshots = Arc::new(FileSnapshotStore::default_location());
    Ok(Arc::new(ShopClient::new(
        Arc::clone(&nebula),
        nebula,
        snapshots,
        settings,
    )))
}

async fn require_session(client: &Client) -> anyhow::Result<()> {
    if client.restore().await?.is_none() {
        anyhow::bail!("no saved session; run 'login --save' first");
    }
    Ok(())
}

async fn print_wallets(client: &Client) {
    for wallet in client.catalog().wallets().await {
        println!("{:>6}: {}", wallet.currency_code, format_amount(wallet.balance));
    }
}

fn format_price(item: &CatalogItem) -> String {
    match &item.pricing {
        Some(p) if p.price != p.discounted_price => format!(
            "{} {} (was {})",
            format_amount(p.discounted_price),
            p.currency_code,
            format_amount(p.price)
        ),
        Some(p) => format!("{} {}", format_amount(p.price), p.currency_code),
        None => "unpriced".to_string(),
    }
}

/// Thousands separated with spaces, matching the in-game display
fn format_amount(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    if amount < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

async fn shop_loop(client: &Arc<Client>) -> anyhow::Result<()> {
    let mut cart = Cart::new();

    loop {
        print_wallets(client).await;
        let choice = Select::new()
            .with_prompt("Storefront")
            .items(&[
                "Add assets to cart",
                "Add C-Stacks to cart",
                "View cart",
                "Remove a cart line",
                "Checkout",
                "Refresh catalog",
                "Logout and quit",
                "Quit",
            ])
            .default(0)
            .interact()?;

        let result = match choice {
            0 => add_assets(client, &mut cart).await,
            1 => add_coins(client, &mut cart).await,
            2 => {
                print_cart(&cart);
                Ok(())
            }
            3 => remove_line(&mut cart),
            4 => checkout(client, &mut cart).await,
            5 => client.catalog().refresh().await.map_err(Into::into),
            6 => {
                client.logout().await;
                println!("Logged out.");
                return Ok(());
            }
            _ => return Ok(()),
        };

        if let Err(e) = result {
            println!("Error: {}", e);
        }
    }
}

async fn add_assets(client: &Arc<Client>, cart: &mut Cart) -> anyhow::Result<()> {
    let families = client.catalog().families().await;
    if families.is_empty() {
        anyhow::bail!("the catalog is empty; refresh it first");
    }

    let mut family_labels = vec!["EVERYTHING".to_string()];
    family_labels.extend(families.iter().map(|f| f.display_name.clone()));
    let family_idx = Select::new()
        .with_prompt("Asset family")
        .items(&family_labels)
        .default(0)
        .interact()?;

    let (family_choice, item_choice) = if family_idx == 0 {
        (FamilyChoice::Everything, ItemChoice::Everything)
    } else {
        let family = &families[family_idx - 1];
        let choice = if family.key == UNIVERSAL_FAMILY_KEY {
            FamilyChoice::Universal
        } else {
            FamilyChoice::Key(family.key.clone())
        };

        let mut item_labels = vec!["EVERYTHING".to_string()];
        item_labels.extend(family.items.iter().map(|i| i.name.clone()));
        let item_idx = Select::new()
            .with_prompt("Asset")
            .items(&item_labels)
            .default(0)
            .interact()?;
        let item = if item_idx == 0 {
            ItemChoice::Everything
        } else {
            ItemChoice::Sku(family.items[item_idx - 1].sku.clone())
        };
        (choice, item)
    };

    let policy = prompt_policy("Quantity per item", "Wallet amount limit")?;
    let selection = CartSelection {
        family: Some(family_choice),
        item: Some(item_choice),
        policy: Some(policy),
    };

    let added = cart.add_selection(&families, &selection)?;
    println!("Added {} line(s) to the cart.", added);
    Ok(())
}

async fn add_coins(client: &Arc<Client>, cart: &mut Cart) -> anyhow::Result<()> {
    let mut tiers = Vec::with_capacity(COIN_TIER_SKUS.len());
    for sku in COIN_TIER_SKUS {
        tiers.push(client.catalog().find_by_sku(sku).await?);
    }

    let policy = prompt_policy("Amount of C-Stacks", "Wallet amount limit")?;
    let added = cart.add_coin_topup(&tiers, policy)?;
    println!("Added {} line(s) to the cart.", added);
    Ok(())
}

fn prompt_policy(quantity_prompt: &str, budget_prompt: &str) -> anyhow::Result<BuyPolicy> {
    let buy_type = Select::new()
        .with_prompt("Buy type")
        .items(&["By quantity", "By wallet amount"])
        .default(0)
        .interact()?;

    if buy_type == 0 {
        let amount: u32 = Input::new().with_prompt(quantity_prompt).interact_text()?;
        Ok(BuyPolicy::ByQuantity(amount))
    } else {
        let amount: i64 = Input::new().with_prompt(budget_prompt).interact_text()?;
        Ok(BuyPolicy::ByBudget(amount))
    }
}

fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("The cart is empty.");
        return;
    }
    for (i, line) in cart.lines().iter().enumerate() {
        println!(
            "{:>3}. {:<35} x{:<5} {} {} [{}]",
            i + 1,
            line.display_name,
            line.quantity,
            format_amount(line.discounted_price),
            line.currency_code,
            line.family_name
        );
    }
    for total in cart.totals() {
        println!(
            "Total {}: {} (full price {}, -{}%)",
            total.currency_code,
            format_amount(total.discounted_total),
            format_amount(total.subtotal),
            total.discount_percent
        );
    }
}

fn remove_line(cart: &mut Cart) -> anyhow::Result<()> {
    if cart.is_empty() {
        anyhow::bail!("the cart is empty");
    }
    print_cart(cart);
    let position: usize = Input::new().with_prompt("Line to remove").interact_text()?;
    let removed = cart.remove(position)?;
    println!("Removed {}.", removed.display_name);
    Ok(())
}

async fn checkout(client: &Arc<Client>, cart: &mut Cart) -> anyhow::Result<()> {
    if cart.is_empty() {
        anyhow::bail!("the cart is empty");
    }
    print_cart(cart);
    if !Confirm::new()
        .with_prompt(format!("Submit {} line(s)?", cart.len()))
        .default(false)
        .interact()?
    {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.executor().start(cart.to_batch(), tx);
    println!("Submitting orders; press Ctrl+C to stop after the current line.");

    let progress = ProgressBar::new(cart.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .expect("invalid progress template"),
    );

    let outcomes = loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                client.executor().stop();
                progress.set_message("stopping after the current line...");
                continue;
            }
        };
        match event {
            Some(BatchEvent::LineStarted { index }) => {
                progress.set_message(cart.lines()[index].display_name.clone());
            }
            Some(BatchEvent::LineTick { .. }) => progress.tick(),
            Some(BatchEvent::LineFinished { index, outcome }) => {
                progress.inc(1);
                progress.println(format!(
                    "{:>3}. {:<35} {}",
                    index + 1,
                    cart.lines()[index].display_name,
                    outcome
                ));
            }
            Some(BatchEvent::BatchFinished { state, outcomes }) => {
                progress.finish_and_clear();
                match state {
                    BatchState::Stopped => println!("Order stopped."),
                    _ => println!("Order finished. Restart your game to see your new assets."),
                }
                break outcomes;
            }
            None => anyhow::bail!("the order batch ended unexpectedly"),
        }
    };

    let fulfilled = outcomes.iter().filter(|o| o.is_fulfilled()).count();
    println!("{} of {} line(s) fulfilled.", fulfilled, outcomes.len());
    cart.prune_fulfilled(&outcomes);

    Ok(())
}
