//! Context blocks injected into the small model's prompt.
//!
//! Every function here is pure and deterministic: the same records always
//! produce the same text.

use chrono::NaiveDateTime;

use crate::types::{FaqMatch, ItemAggregate, PurchaseRecord, ScoredProduct};

pub const NO_ITEMS_FOUND: &str = "No items found for the given titles.";
pub const NO_PRODUCTS_FOUND: &str = "No relevant products found.\n";
pub const ORDER_HEADER: &str = "Order Details:";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATE_FORMAT).to_string()
}

/// Currency with two decimals and thousands separators. The minus sign
/// precedes the symbol: `-$7.50`.
pub fn format_money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// One block per item aggregate, each followed by a blank line.
pub fn format_item_aggregates(items: &[&ItemAggregate], tracking_display_limit: usize) -> String {
    if items.is_empty() {
        return NO_ITEMS_FOUND.to_string();
    }

    let mut lines = Vec::with_capacity(items.len() * 8);
    for item in items {
        lines.push(format!("Title: {}", item.title));
        lines.push(format!("StockCode: {}", item.stock_code));
        lines.push(format!(
            "Most Recent Order: {}",
            format_datetime(&item.most_recent_order)
        ));
        lines.push(format!(
            "Most Recent Order Tracking Number: {}",
            item.most_recent_tracking_number
        ));
        lines.push(format!("Total Spent: {}", format_money(item.total_spent)));
        lines.push(format!("Total Quantity Purchased: {}", item.total_quantity));

        let tracking = &item.tracking_numbers;
        if tracking.len() <= tracking_display_limit {
            lines.push(format!("Tracking Numbers: {}", tracking.join(", ")));
        } else {
            lines.push(format!(
                "Tracking Numbers: {}... ({} total)",
                tracking[..tracking_display_limit].join(", "),
                tracking.len()
            ));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

/// The line items of a single invoice as one order block. Quantities are
/// summed per stock code in first-seen order. An empty slice yields only the
/// header.
pub fn format_order(items: &[PurchaseRecord]) -> String {
    let Some(first) = items.first() else {
        return ORDER_HEADER.to_string();
    };

    let mut aggregated: Vec<(&str, &str, i64)> = Vec::new();
    for row in items {
        match aggregated.iter_mut().find(|(code, _, _)| *code == row.stock_code) {
            Some(entry) => {
                entry.1 = row.title.as_str();
                entry.2 += row.quantity;
            }
            None => aggregated.push((row.stock_code.as_str(), row.title.as_str(), row.quantity)),
        }
    }
    let total: f64 = items.iter().map(PurchaseRecord::line_total).sum();

    let mut lines = vec![
        ORDER_HEADER.to_string(),
        format!("TrackingNumber: {}", first.tracking_number),
    ];
    if let Some(delivery) = &first.delivery_date {
        lines.push(format!("DeliveryDate: {}", format_datetime(delivery)));
    }
    lines.push(format!("OrderDate: {}", format_datetime(&first.order_date)));
    lines.push(format!("Address: {}", first.address));
    lines.push(format!("Total Cost: {}", format_money(total)));
    lines.push("ITEMS: ['StockCode', 'Title', 'Quantity']".to_string());
    for (code, title, quantity) in aggregated {
        lines.push(format!(" - [{}, {}, {}]", code, title, quantity));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn format_products(products: &[ScoredProduct]) -> String {
    if products.is_empty() {
        return NO_PRODUCTS_FOUND.to_string();
    }
    let mut out = String::from("Relevant Products:\n");
    for product in products {
        for (name, value) in product.record.fields() {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out.push('\n');
    }
    out
}

/// Numbered question/answer pairs. An empty list yields an empty string.
pub fn format_faqs(faqs: &[FaqMatch]) -> String {
    if faqs.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant FAQs:\n\n");
    for (i, faq) in faqs.iter().enumerate() {
        out.push_str(&format!("{}. Q: {}\n   A: {}\n\n", i + 1, faq.question, faq.answer));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductRecord;
    use chrono::NaiveDate;

    fn dt(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 12, day)
            .unwrap()
            .and_hms_opt(12, 8, 0)
            .unwrap()
    }

    fn line(code: &str, title: &str, qty: i64, price: f64) -> PurchaseRecord {
        PurchaseRecord {
            tracking_number: "536592".to_string(),
            stock_code: code.to_string(),
            title: title.to_string(),
            quantity: qty,
            unit_price: price,
            order_date: dt(1),
            delivery_date: Some(dt(4)),
            address: "12 Main St".to_string(),
            customer_id: 42,
            embedding: Vec::new(),
        }
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(20.0), "$20.00");
        assert_eq!(format_money(1234.5), "$1,234.50");
        assert_eq!(format_money(-7.5), "-$7.50");
        assert_eq!(format_money(1_234_567.891), "$1,234,567.89");
        assert_eq!(format_money(0.0), "$0.00");
        assert_eq!(format_money(-0.001), "$0.00");
    }

    #[test]
    fn test_format_order_aggregates_by_stock_code() {
        let items = vec![
            line("A1", "HEART MUG", 1, 5.0),
            line("B2", "LANTERN", 1, 10.0),
            line("A1", "HEART MUG", 1, 5.0),
        ];
        let text = format_order(&items);
        let expected = "Order Details:\n\
            TrackingNumber: 536592\n\
            DeliveryDate: 2010-12-04 12:08:00\n\
            OrderDate: 2010-12-01 12:08:00\n\
            Address: 12 Main St\n\
            Total Cost: $20.00\n\
            ITEMS: ['StockCode', 'Title', 'Quantity']\n \
            - [A1, HEART MUG, 2]\n \
            - [B2, LANTERN, 1]\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_order_return_and_empty() {
        let mut item = line("A1", "HEART MUG", -3, 2.5);
        item.tracking_number = "C536379".to_string();
        item.delivery_date = None;
        let text = format_order(&[item]);
        assert!(text.contains("Total Cost: -$7.50"));
        assert!(!text.contains("DeliveryDate"));

        assert_eq!(format_order(&[]), "Order Details:");
    }

    #[test]
    fn test_format_item_aggregates_truncates_tracking_numbers() {
        let item = ItemAggregate {
            title: "WHITE METAL LANTERN".to_string(),
            stock_code: "71053".to_string(),
            most_recent_order: dt(1),
            most_recent_tracking_number: "536365".to_string(),
            total_spent: 40.68,
            total_quantity: 12,
            tracking_numbers: (0..12).map(|i| format!("5363{:02}", i)).collect(),
        };
        let text = format_item_aggregates(&[&item], 10);
        assert!(text.starts_with("Title: WHITE METAL LANTERN\nStockCode: 71053\n"));
        assert!(text.contains("Most Recent Order: 2010-12-01 12:08:00"));
        assert!(text.contains("Total Spent: $40.68"));
        assert!(text.contains("536309... (12 total)"));
        assert!(!text.contains("536310"));
        assert!(text.ends_with("\n"));

        assert_eq!(format_item_aggregates(&[], 10), NO_ITEMS_FOUND);
    }

    #[test]
    fn test_format_products_and_faqs() {
        let products = vec![ScoredProduct {
            record: ProductRecord {
                stock_code: "22423".to_string(),
                title: "REGENCY CAKESTAND 3 TIER".to_string(),
                unit_price: Some(12.75),
                stock_quantity: Some(30),
                embedding: vec![0.5; 4],
            },
            score: 0.9,
        }];
        assert_eq!(
            format_products(&products),
            "Relevant Products:\nStockCode: 22423\nTitle: REGENCY CAKESTAND 3 TIER\nUnitPrice: 12.75\nStockQuantity: 30\n\n"
        );
        assert_eq!(format_products(&[]), NO_PRODUCTS_FOUND);

        let faqs = vec![FaqMatch {
            question: "Can I cancel my order?".to_string(),
            answer: "Yes, within 24 hours.".to_string(),
            categories: vec!["orders".to_string()],
            score: 0.8,
        }];
        assert_eq!(
            format_faqs(&faqs),
            "Relevant FAQs:\n\n1. Q: Can I cancel my order?\n   A: Yes, within 24 hours.\n\n"
        );
        assert_eq!(format_faqs(&[]), "");
    }
}
