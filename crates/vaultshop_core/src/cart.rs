use crate::catalog::{family_display_name, UNIVERSAL_FAMILY_KEY};
use crate::entities::{AssetFamily, BuyPolicy, CartLine, CatalogItem, OrderOutcome};
use crate::error::Error;

/// Fixed coin-bundle SKUs, largest denomination first. The greedy top-up
/// walks them in this order to minimize the number of cart lines.
pub const COIN_TIER_SKUS: [&str; 3] = [
    "pd3_coin_goldlarge0",
    "pd3_coin_goldmedium0",
    "pd3_coin_goldsmall0",
];

/// Which part of the asset catalog a cart-add draws from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyChoice {
    /// The universal asset set
    Universal,
    /// One family by derived SKU key
    Key(String),
    /// Every non-universal family
    Everything,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChoice {
    Sku(String),
    Everything,
}

/// User-assembled selector for one cart-add operation. All fields must be
/// set (validated, not assumed) before any quantity is computed.
#[derive(Debug, Clone, Default)]
pub struct CartSelection {
    pub family: Option<FamilyChoice>,
    pub item: Option<ItemChoice>,
    pub policy: Option<BuyPolicy>,
}

impl CartSelection {
    fn validated(&self) -> Result<(&FamilyChoice, &ItemChoice, BuyPolicy), Error> {
        let family = self
            .family
            .as_ref()
            .ok_or_else(|| Error::Validation("you have to specify the item family".to_string()))?;
        let item = self
            .item
            .as_ref()
            .ok_or_else(|| Error::Validation("asset was not selected".to_string()))?;
        if *family == FamilyChoice::Everything && *item != ItemChoice::Everything {
            return Err(Error::Validation("asset selection is incorrect".to_string()));
        }
        let policy = self
            .policy
            .ok_or_else(|| Error::Validation("you have to specify the buy type".to_string()))?;
        match policy {
            BuyPolicy::ByQuantity(0) => {
                return Err(Error::Validation(
                    "you cannot place an order for 0 items".to_string(),
                ))
            }
            BuyPolicy::ByBudget(b) if b < 0 => {
                return Err(Error::Validation(
                    "the wallet amount limit cannot be negative".to_string(),
                ))
            }
            _ => {}
        }
        Ok((family, item, policy))
    }
}

/// Ordered cart of derived lines. Owned by the interactive session; mutable
/// only through explicit add/remove, and removal renumbers the remainder.
#[derive(Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

/// Per-currency aggregate over the cart, in first-encounter order
#[derive(Debug, Clone, PartialEq)]
pub struct CartTotal {
    pub currency_code: String,
    pub subtotal: i64,
    pub discounted_total: i64,
    pub discount_percent: f64,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Remove exactly one line by its displayed 1-based position; the
    /// remaining lines keep their order and are renumbered with no gaps.
    pub fn remove(&mut self, position: usize) -> Result<CartLine, Error> {
        if position == 0 || position > self.lines.len() {
            return Err(Error::Validation(format!(
                "no cart line at position {}",
                position
            )));
        }
        Ok(self.lines.remove(position - 1))
    }

    /// Take the lines out for a checkout pass, leaving the cart intact
    pub fn to_batch(&self) -> Vec<CartLine> {
        self.lines.clone()
    }

    /// Drop the lines a finished batch fulfilled, keeping failed and
    /// unprocessed ones for another attempt. Outcomes are positional and
    /// may be shorter than the cart when the batch was stopped early.
    pub fn prune_fulfilled(&mut self, outcomes: &[OrderOutcome]) {
        let mut index = 0;
        self.lines.retain(|_| {
            let fulfilled = outcomes.get(index).is_some_and(|o| o.is_fulfilled());
            index += 1;
            !fulfilled
        });
    }

    /// Resolve a selection against the grouped catalog and append the derived
    /// lines. Returns how many lines were added; zero-quantity results are
    /// dropped silently.
    pub fn add_selection(
        &mut self,
        families: &[AssetFamily],
        selection: &CartSelection,
    ) -> Result<usize, Error> {
        let (family, item, policy) = selection.validated()?;

        let members = resolve_members(families, family, item);
        if members.is_empty() {
            return Err(Error::Validation(
                "could not find item in the shop".to_string(),
            ));
        }

        let quantity = match policy {
            BuyPolicy::ByQuantity(n) => n,
            BuyPolicy::ByBudget(budget) => {
                // The cap is divided by the sum of the group's discounted unit
                // prices; one shared quantity applies to every member. A zero
                // price sum falls back to quantity 1 (documented quirk of the
                // storefront, kept as-is).
                let price_sum: i64 = members
                    .iter()
                    .filter_map(|(_, i)| i.pricing.as_ref())
                    .map(|p| p.discounted_price)
                    .sum();
                if price_sum == 0 {
                    1
                } else {
                    u32::try_from(budget / price_sum).unwrap_or(u32::MAX)
                }
            }
        };

        if quantity == 0 {
            return Ok(0);
        }

        let mut added = 0;
        for (family_key, member) in members {
            let Some(pricing) = member.pricing.as_ref() else {
                continue;
            };
            self.lines.push(CartLine {
                item_id: member.item_id.clone(),
                quantity,
                price: pricing.price * i64::from(quantity),
                discounted_price: pricing.discounted_price * i64::from(quantity),
                currency_code: pricing.currency_code.clone(),
                region: member.region.clone(),
                language: member.language.clone(),
                display_name: member.name.clone(),
                family_name: family_display_name(&family_key),
            });
            added += 1;
        }
        Ok(added)
    }

    /// Greedy coin top-up: walk the denomination tiers largest-first,
    /// subtracting the consumed amount (coins or budget) after each tier.
    ///
    /// `ByQuantity` reads the amount as a coin count and divides by each
    /// tier's redemption multiplier; `ByBudget` divides the spending cap by
    /// each tier's discounted unit price.
    pub fn add_coin_topup(&mut self, tiers: &[CatalogItem], policy: BuyPolicy) -> Result<usize, Error> {
        let mut remaining: i64 = match policy {
            BuyPolicy::ByQuantity(0) => {
                return Err(Error::Validation(
                    "you cannot place an order for 0 items".to_string(),
                ))
            }
            BuyPolicy::ByQuantity(n) => i64::from(n),
            BuyPolicy::ByBudget(b) if b <= 0 => {
                return Err(Error::Validation(
                    "the wallet amount limit must be positive".to_string(),
                ))
            }
            BuyPolicy::ByBudget(b) => b,
        };

        let mut added = 0;
        for tier in tiers {
            let Some(pricing) = tier.pricing.as_ref() else {
                continue;
            };
            let divisor = match policy {
                BuyPolicy::ByQuantity(_) => tier.use_count,
                BuyPolicy::ByBudget(_) => pricing.discounted_price,
            };
            if divisor <= 0 {
                continue;
            }
            let count = remaining / divisor;
            if count == 0 {
                continue;
            }
            let quantity = u32::try_from(count).unwrap_or(u32::MAX);
            self.lines.push(CartLine {
                item_id: tier.item_id.clone(),
                quantity,
                price: pricing.price * count,
                discounted_price: pricing.discounted_price * count,
                currency_code: pricing.currency_code.clone(),
                region: tier.region.clone(),
                language: tier.language.clone(),
                display_name: tier.name.clone(),
                family_name: "Universal".to_string(),
            });
            remaining -= divisor * count;
            added += 1;
        }
        Ok(added)
    }

    /// Per-currency subtotal, discounted total and discount percentage
    pub fn totals(&self) -> Vec<CartTotal> {
        let mut totals: Vec<CartTotal> = Vec::new();
        for line in &self.lines {
            match totals
                .iter_mut()
                .find(|t| t.currency_code == line.currency_code)
            {
                Some(total) => {
                    total.subtotal += line.price;
                    total.discounted_total += line.discounted_price;
                }
                None => totals.push(CartTotal {
                    currency_code: line.currency_code.clone(),
                    subtotal: line.price,
                    discounted_total: line.discounted_price,
                    discount_percent: 0.0,
                }),
            }
        }
        for total in &mut totals {
            total.discount_percent = if total.subtotal == 0 {
                0.0
            } else {
                let raw =
                    (1.0 - total.discounted_total as f64 / total.subtotal as f64) * 10_000.0;
                raw.round() / 100.0
            };
        }
        totals
    }
}

/// Collect the catalog members a selection refers to, with their family key
fn resolve_members(
    families: &[AssetFamily],
    family: &FamilyChoice,
    item: &ItemChoice,
) -> Vec<(String, CatalogItem)> {
    let mut members = Vec::new();
    for group in families {
        let in_scope = match family {
            FamilyChoice::Universal => group.key == UNIVERSAL_FAMILY_KEY,
            FamilyChoice::Key(key) => &group.key == key,
            FamilyChoice::Everything => group.key != UNIVERSAL_FAMILY_KEY,
        };
        if !in_scope {
            continue;
        }
        for member in &group.items {
            let wanted = match item {
                ItemChoice::Everything => true,
                ItemChoice::Sku(sku) => &member.sku == sku,
            };
            if wanted {
                members.push((group.key.clone(), member.clone()));
            }
        }
    }
    members
}
