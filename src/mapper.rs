//! Converts orders plus their fulfillments into chart-report transactions.
//!
//! Pure given its inputs: the caller fetches fulfillments when they are not
//! attached to the order, and the catalog snapshot is read-only here.

use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::Snapshot;
use crate::model::{Transaction, TxStatus};
use crate::shopify::model::{Fulfillment, Order};

/// Nation code used when a country name has no table entry.
const DEFAULT_NATION: &str = "XX";

/// Maps one order to zero or more transactions. Fulfillments without a
/// tracking reference are skipped (not actually shipped); line items whose
/// variant has no catalog entry are skipped (not report-eligible); line
/// items with a non-positive quantity are skipped (nothing to report).
pub fn map_order(
    order: &Order,
    fulfillments: &[Fulfillment],
    catalog: &Snapshot,
    now: DateTime<Utc>,
) -> Vec<Transaction> {
    let demographic_text = demographic_text(order);
    let sws_sex = extract_gender(&demographic_text).map(str::to_owned);
    let sws_birth = extract_birth_year(&demographic_text, now.year());
    let nation = nation_code(order);
    let addr_top = order
        .shipping_address
        .as_ref()
        .and_then(|a| a.province.clone().or_else(|| a.city.clone()));

    let mut transactions = Vec::new();
    for fulfillment in fulfillments {
        let Some(tracking) = fulfillment.tracking_reference() else {
            continue;
        };
        for line_item in &fulfillment.line_items {
            if line_item.quantity <= 0 {
                continue;
            }
            let Some(variant_id) = line_item.variant_id else {
                continue;
            };
            let Some(entry) = catalog.lookup(variant_id) else {
                continue;
            };
            transactions.push(Transaction {
                order_id: order.id,
                order_name: order.name.clone(),
                fulfillment_id: fulfillment.id,
                line_item_id: line_item.id,
                item_id: entry.item_id,
                parent_id: entry.parent_id,
                barcode: entry.report_barcode.clone(),
                display_name: display_name(entry),
                quantity: line_item.quantity,
                nation: nation.clone(),
                addr_top: addr_top.clone(),
                sws_sex: sws_sex.clone(),
                sws_birth: sws_birth.clone(),
                real_time: fulfillment.created_at.timestamp(),
                tracking_number: tracking.to_owned(),
                status: TxStatus::Pending,
                error_detail: None,
            });
        }
    }
    transactions
}

fn display_name(entry: &crate::model::CatalogEntry) -> String {
    if entry.variant_title.is_empty() || entry.variant_title == "Default Title" {
        entry.display_title.clone()
    } else {
        format!("{} - {}", entry.display_title, entry.variant_title)
    }
}

/// Free-text blob the demographic heuristics run over: customer tags and
/// notes plus the order note.
fn demographic_text(order: &Order) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(customer) = &order.customer {
        if let Some(tags) = customer.tags.as_deref() {
            parts.push(tags);
        }
        if let Some(note) = customer.note.as_deref() {
            parts.push(note);
        }
    }
    if let Some(note) = order.note.as_deref() {
        parts.push(note);
    }
    parts.join("\n")
}

static FEMALE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(female|woman|girl|f)\b").expect("valid gender regex"));
static MALE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(male|man|boy|m)\b").expect("valid gender regex"));

/// Best-effort gender extraction from free-text tags/notes. Heuristic, not
/// authoritative: returns Hanteo's `M`/`W` enum or nothing.
/// Checked female-first because "female" contains "male".
pub(crate) fn extract_gender(text: &str) -> Option<&'static str> {
    if FEMALE_RE.is_match(text) {
        Some("W")
    } else if MALE_RE.is_match(text) {
        Some("M")
    } else {
        None
    }
}

static BIRTH_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:birth|yob|born)\s*[:=]?\s*(\d{4})").expect("valid birth-tag regex")
});
static DATE_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-\d{2}-\d{2}\b|\b\d{2}/\d{2}/(\d{4})\b").expect("valid date regex"));

/// Best-effort birth-year extraction: an explicit `birth: 1995`-style tag,
/// or the year component of a birth-date string. Years outside
/// `[1900, current_year]` are discarded.
pub(crate) fn extract_birth_year(text: &str, current_year: i32) -> Option<String> {
    let candidate = BIRTH_TAG_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .or_else(|| {
            DATE_YEAR_RE
                .captures(text)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
        })?
        .as_str();
    let year: i32 = candidate.parse().ok()?;
    if (1900..=current_year).contains(&year) {
        Some(candidate.to_owned())
    } else {
        None
    }
}

/// Shipping country resolution: prefer the address country code; fall back
/// to the static name table, defaulting for unmapped names.
fn nation_code(order: &Order) -> Option<String> {
    let address = order.shipping_address.as_ref()?;
    if let Some(code) = address.country_code.as_deref() {
        let code = code.trim();
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(code.to_ascii_uppercase());
        }
    }
    address
        .country
        .as_deref()
        .map(|name| country_to_code(name).to_owned())
}

/// Static country-name→code table for addresses carrying only a name.
fn country_to_code(name: &str) -> &'static str {
    match name.trim().to_lowercase().as_str() {
        "south korea" | "korea, republic of" | "republic of korea" | "korea" => "KR",
        "united states" | "united states of america" | "usa" => "US",
        "japan" => "JP",
        "china" => "CN",
        "taiwan" => "TW",
        "hong kong" => "HK",
        "singapore" => "SG",
        "malaysia" => "MY",
        "thailand" => "TH",
        "indonesia" => "ID",
        "philippines" => "PH",
        "vietnam" | "viet nam" => "VN",
        "india" => "IN",
        "australia" => "AU",
        "new zealand" => "NZ",
        "canada" => "CA",
        "mexico" => "MX",
        "brazil" => "BR",
        "argentina" => "AR",
        "chile" => "CL",
        "peru" => "PE",
        "united kingdom" | "great britain" => "GB",
        "ireland" => "IE",
        "france" => "FR",
        "germany" => "DE",
        "spain" => "ES",
        "portugal" => "PT",
        "italy" => "IT",
        "netherlands" => "NL",
        "belgium" => "BE",
        "sweden" => "SE",
        "norway" => "NO",
        "denmark" => "DK",
        "finland" => "FI",
        "poland" => "PL",
        "russia" | "russian federation" => "RU",
        "turkey" | "türkiye" => "TR",
        "united arab emirates" => "AE",
        "saudi arabia" => "SA",
        "south africa" => "ZA",
        _ => DEFAULT_NATION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CatalogEntry;
    use crate::shopify::model::{Customer, LineItem, ShippingAddress};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn snapshot_with(entries: Vec<CatalogEntry>) -> Snapshot {
        let map: HashMap<i64, CatalogEntry> =
            entries.into_iter().map(|e| (e.item_id, e)).collect();
        Snapshot::for_tests(map, Some(Utc::now()))
    }

    fn entry(item_id: i64, barcode: &str) -> CatalogEntry {
        CatalogEntry {
            item_id,
            parent_id: 100,
            display_title: "Test Album".into(),
            variant_title: "Default Title".into(),
            vendor: None,
            report_barcode: barcode.into(),
            tags: "album".into(),
        }
    }

    fn order(id: i64) -> Order {
        Order {
            id,
            name: format!("#{id}"),
            note: None,
            customer: None,
            shipping_address: None,
            fulfillments: vec![],
        }
    }

    fn fulfillment(id: i64, tracking: Option<&str>, items: Vec<LineItem>) -> Fulfillment {
        Fulfillment {
            id,
            status: Some("success".into()),
            created_at: Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap(),
            tracking_number: tracking.map(str::to_owned),
            tracking_numbers: vec![],
            line_items: items,
        }
    }

    fn line_item(id: i64, variant_id: i64, quantity: i64) -> LineItem {
        LineItem {
            id,
            variant_id: Some(variant_id),
            product_id: Some(100),
            title: "Test Album".into(),
            quantity,
        }
    }

    #[test]
    fn maps_tracked_album_line_item() {
        let catalog = snapshot_with(vec![entry(9876543210, "8809633189505")]);
        let order = order(1001);
        let fulfillments = vec![fulfillment(
            5001,
            Some("1Z999AA10123456784"),
            vec![line_item(7001, 9876543210, 2)],
        )];

        let txs = map_order(&order, &fulfillments, &catalog, Utc::now());
        assert_eq!(txs.len(), 1);
        let tx = &txs[0];
        assert_eq!(tx.quantity, 2);
        assert_eq!(tx.barcode, "8809633189505");
        assert_eq!(tx.item_id, 9876543210);
        assert_eq!(tx.real_time, Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap().timestamp());
        assert_eq!(tx.status, TxStatus::Pending);
    }

    #[test]
    fn unknown_variant_yields_no_transactions() {
        let catalog = snapshot_with(vec![entry(9876543210, "8809633189505")]);
        let order = order(1002);
        let fulfillments = vec![fulfillment(
            5002,
            Some("1Z999"),
            vec![line_item(7002, 1111111111, 1)],
        )];
        assert!(map_order(&order, &fulfillments, &catalog, Utc::now()).is_empty());
    }

    #[test]
    fn untracked_fulfillment_is_skipped() {
        let catalog = snapshot_with(vec![entry(9876543210, "8809633189505")]);
        let order = order(1003);
        let fulfillments = vec![fulfillment(5003, None, vec![line_item(7003, 9876543210, 1)])];
        assert!(map_order(&order, &fulfillments, &catalog, Utc::now()).is_empty());
    }

    #[test]
    fn nonpositive_quantity_is_dropped() {
        let catalog = snapshot_with(vec![entry(42, "12345678")]);
        let order = order(1005);
        let fulfillments = vec![fulfillment(
            5005,
            Some("KR456"),
            vec![
                line_item(7005, 42, 0),
                line_item(7006, 42, -2),
                line_item(7007, 42, 1),
            ],
        )];

        let txs = map_order(&order, &fulfillments, &catalog, Utc::now());
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].line_item_id, 7007);
        assert_eq!(txs[0].quantity, 1);
    }

    #[test]
    fn demographics_and_nation_flow_into_transaction() {
        let catalog = snapshot_with(vec![entry(42, "12345678")]);
        let mut o = order(1004);
        o.customer = Some(Customer {
            id: 1,
            tags: Some("vip, female, birth:1995".into()),
            note: None,
        });
        o.shipping_address = Some(ShippingAddress {
            country: Some("South Korea".into()),
            country_code: None,
            province: Some("Seoul".into()),
            city: None,
        });
        let fulfillments = vec![fulfillment(5004, Some("KR123"), vec![line_item(7004, 42, 1)])];

        let txs = map_order(&o, &fulfillments, &catalog, Utc::now());
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].sws_sex.as_deref(), Some("W"));
        assert_eq!(txs[0].sws_birth.as_deref(), Some("1995"));
        assert_eq!(txs[0].nation.as_deref(), Some("KR"));
        assert_eq!(txs[0].addr_top.as_deref(), Some("Seoul"));
    }

    #[test]
    fn gender_extraction() {
        assert_eq!(extract_gender("female"), Some("W"));
        assert_eq!(extract_gender("VIP, F, 1990"), Some("W"));
        assert_eq!(extract_gender("male customer"), Some("M"));
        assert_eq!(extract_gender("tags: m"), Some("M"));
        assert_eq!(extract_gender("no hints here"), None);
        // "female" must not match the male pattern.
        assert_eq!(extract_gender("Female"), Some("W"));
    }

    #[test]
    fn birth_year_extraction() {
        assert_eq!(extract_birth_year("birth: 1995", 2026), Some("1995".into()));
        assert_eq!(extract_birth_year("YOB=2001", 2026), Some("2001".into()));
        assert_eq!(extract_birth_year("born 1987", 2026), Some("1987".into()));
        assert_eq!(extract_birth_year("dob 1995-03-02", 2026), Some("1995".into()));
        assert_eq!(extract_birth_year("03/02/1995", 2026), Some("1995".into()));
        // Out of range.
        assert_eq!(extract_birth_year("birth: 1899", 2026), None);
        assert_eq!(extract_birth_year("birth: 2099", 2026), None);
        assert_eq!(extract_birth_year("no year", 2026), None);
    }

    #[test]
    fn nation_prefers_country_code_over_name() {
        let mut o = order(1);
        o.shipping_address = Some(ShippingAddress {
            country: Some("Japan".into()),
            country_code: Some("kr".into()),
            province: None,
            city: None,
        });
        assert_eq!(nation_code(&o).as_deref(), Some("KR"));
    }

    #[test]
    fn nation_falls_back_to_name_table_and_default() {
        let mut o = order(1);
        o.shipping_address = Some(ShippingAddress {
            country: Some("United Kingdom".into()),
            country_code: None,
            province: None,
            city: None,
        });
        assert_eq!(nation_code(&o).as_deref(), Some("GB"));

        o.shipping_address = Some(ShippingAddress {
            country: Some("Atlantis".into()),
            country_code: None,
            province: None,
            city: None,
        });
        assert_eq!(nation_code(&o).as_deref(), Some("XX"));

        o.shipping_address = None;
        assert_eq!(nation_code(&o), None);
    }
}
