// src/process/mod.rs
pub mod batch;
pub mod extract;
pub mod workbook;

pub use batch::{verify_rows, MergedRow};
pub use extract::{extract_rows, InputFormat};
pub use workbook::{write_workbook, Artifact, OUTPUT_FILENAME};

/// Shipping-label column names as exported by the order system.
pub mod columns {
    pub const NAME: &str = "Ship To - Name";
    pub const COMPANY: &str = "Ship To - Company";
    pub const ADDRESS1: &str = "Ship To - Address 1";
    pub const ADDRESS2: &str = "Ship To - Address 2";
    pub const ADDRESS3: &str = "Ship To - Address 3";
    pub const CITY: &str = "Ship To - City";
    pub const STATE: &str = "Ship To - State";
    pub const ZONE: &str = "Ship To - Zone";
    pub const POSTAL_CODE: &str = "Ship To - Postal Code";
    pub const COUNTRY: &str = "Ship To - Country";
    pub const ORDER_NUMBER: &str = "Order - Number";
    pub const CUSTOMER_EMAIL: &str = "Customer Email";

    pub const ORIGINAL_ADDRESS: &str = "Original Address";
    pub const VERIFIED_ADDRESS: &str = "Verified Address";

    /// Passthrough columns, in output order.
    pub const KNOWN: [&str; 12] = [
        NAME,
        COMPANY,
        ADDRESS1,
        ADDRESS2,
        ADDRESS3,
        CITY,
        STATE,
        ZONE,
        POSTAL_CODE,
        COUNTRY,
        ORDER_NUMBER,
        CUSTOMER_EMAIL,
    ];

    /// Fields joined into the address string, in join order.
    pub const ADDRESS_PARTS: [&str; 7] =
        [ADDRESS1, ADDRESS2, ADDRESS3, CITY, STATE, POSTAL_CODE, COUNTRY];
}

const ADDRESS_SEPARATOR: &str = ", ";

/// One input row: column name to cell value, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Value for `column`, or `""` when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Join the non-blank address parts with `", "`, or `None` when there
    /// are none.
    pub fn address_string(&self) -> Option<String> {
        let parts: Vec<&str> = columns::ADDRESS_PARTS
            .iter()
            .map(|c| self.get(c).trim())
            .filter(|v| !v.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(ADDRESS_SEPARATOR))
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
