/*!
 * # Checkout input validation
 *
 * Pure checks over the shipping address, cart lines, amounts and coupon code. Each check
 * collects every failing reason instead of stopping at the first, so the client can show the
 * full list at once. Nothing here touches storage.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::errors::ServiceError;
use crate::models::{CartItem, ShippingAddress};

pub const MAX_CART_ITEMS: usize = 50;
pub const MAX_ITEM_QUANTITY: i64 = 100;
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
pub const MAX_COUPON_LENGTH: usize = 50;

/// Allowed gap between a line's total and `unit_price * quantity`.
pub const LINE_TOTAL_TOLERANCE: Decimal = Decimal::ONE;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9\s\-()]*$").expect("valid phone regex"));
static POSTAL_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9][0-9]{5}$").expect("valid postal code regex"));
static ITEM_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid item id regex"));
static COUPON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid coupon regex"));

/// Accumulated validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    errors: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    pub fn check(&mut self, ok: bool, reason: impl Into<String>) {
        if !ok {
            self.push(reason);
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::ValidationFailed(self.errors))
        }
    }
}

pub fn validate_address(address: &ShippingAddress) -> ValidationReport {
    let mut report = ValidationReport::new();

    report.check(
        address.full_name.trim().chars().count() >= 2,
        "Name must be at least 2 characters",
    );
    report.check(
        EMAIL_RE.is_match(address.email.trim()),
        "Invalid email address",
    );

    let phone = address.phone.trim();
    let phone_len = phone.chars().count();
    report.check(
        PHONE_RE.is_match(phone) && (10..=20).contains(&phone_len),
        "Invalid phone number",
    );

    report.check(
        address.address_line1.trim().chars().count() >= 5,
        "Address must be at least 5 characters",
    );
    report.check(
        address.city.trim().chars().count() >= 2,
        "City must be at least 2 characters",
    );
    report.check(
        address.state.trim().chars().count() >= 2,
        "State must be at least 2 characters",
    );
    report.check(
        POSTAL_CODE_RE.is_match(address.postal_code.trim()),
        "Postal code must be 6 digits and cannot start with 0",
    );

    report
}

pub fn validate_cart_items(items: &[CartItem]) -> ValidationReport {
    let mut report = ValidationReport::new();

    if items.is_empty() {
        report.push("Cart must contain at least one item");
        return report;
    }
    if items.len() > MAX_CART_ITEMS {
        report.push(format!("Cart cannot contain more than {} items", MAX_CART_ITEMS));
    }

    for (index, item) in items.iter().enumerate() {
        let line = index + 1;

        report.check(
            ITEM_ID_RE.is_match(&item.id),
            format!("Item {}: invalid product id", line),
        );
        report.check(
            (1..=MAX_ITEM_QUANTITY).contains(&item.quantity),
            format!(
                "Item {}: quantity must be between 1 and {}",
                line, MAX_ITEM_QUANTITY
            ),
        );
        report.check(
            item.unit_price >= Decimal::ZERO && item.unit_price <= MAX_UNIT_PRICE,
            format!("Item {}: unit price must be between 0 and {}", line, MAX_UNIT_PRICE),
        );

        match item
            .unit_price
            .checked_mul(Decimal::from(item.quantity))
            .and_then(|expected| Some((expected, item.total_price.checked_sub(expected)?)))
        {
            Some((expected, gap)) => report.check(
                gap.abs() <= LINE_TOTAL_TOLERANCE,
                format!(
                    "Item {}: total price {} does not match unit price x quantity ({})",
                    line, item.total_price, expected
                ),
            ),
            None => report.push(format!("Item {}: unit price x quantity is out of range", line)),
        }
    }

    report
}

/// Amount in minor units against the configured bounds.
pub fn validate_amount(amount_minor_units: i64, min: i64, max: i64) -> ValidationReport {
    let mut report = ValidationReport::new();
    report.check(
        (min..=max).contains(&amount_minor_units),
        format!("Amount must be between {} and {} minor units", min, max),
    );
    report
}

pub fn validate_coupon_code(code: Option<&str>) -> ValidationReport {
    let mut report = ValidationReport::new();
    if let Some(code) = code {
        report.check(
            code.len() <= MAX_COUPON_LENGTH && COUPON_RE.is_match(code),
            "Coupon code may only contain letters, digits, '_' or '-' (max 50)",
        );
    }
    report
}

/// Cross-checks the client's amount and discount against the server-side subtotal.
pub fn validate_order_totals(
    requested_amount: i64,
    subtotal: i64,
    discount: i64,
) -> ValidationReport {
    let mut report = ValidationReport::new();

    if discount < 0 {
        report.push("Discount cannot be negative");
    } else if discount > subtotal {
        report.push("Discount cannot exceed the order subtotal");
    } else {
        let expected = subtotal - discount;
        report.check(
            requested_amount.abs_diff(expected) <= 1,
            format!(
                "Amount {} does not match the order total {}",
                requested_amount, expected
            ),
        );
    }

    report
}
