use serde::{Deserialize, Serialize};

/// One column of a requested tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OidColumn {
    /// Sub-OID below the tree base, walked as a column.
    Column(String),
    /// Not walked; yields the row index (the OID suffix) instead.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OidEncoding {
    String,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendOidSpec {
    pub column: OidColumn,
    pub encoding: OidEncoding,
    pub save_to_cache: bool,
}

impl BackendOidSpec {
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            column: OidColumn::Column(column.into()),
            encoding: OidEncoding::String,
            save_to_cache: false,
        }
    }

    pub fn end() -> Self {
        Self {
            column: OidColumn::End,
            encoding: OidEncoding::String,
            save_to_cache: false,
        }
    }

    pub fn binary(mut self) -> Self {
        self.encoding = OidEncoding::Binary;
        self
    }

    pub fn cached(mut self) -> Self {
        self.save_to_cache = true;
        self
    }
}

/// Base OID plus the columns to walk below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSnmpTree {
    pub base: String,
    pub oids: Vec<BackendOidSpec>,
}

impl BackendSnmpTree {
    pub fn new(base: impl Into<String>, oids: Vec<BackendOidSpec>) -> Self {
        Self { base: base.into(), oids }
    }

    /// OIDs actually walked, paired with their column spec.
    pub fn fetch_oids(&self) -> impl Iterator<Item = (String, &BackendOidSpec)> + '_ {
        self.oids.iter().filter_map(move |spec| match &spec.column {
            OidColumn::Column(column) => Some((format!("{}.{}", self.base, column), spec)),
            OidColumn::End => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnmpValue {
    Text(String),
    Binary(Vec<u8>),
}

impl SnmpValue {
    pub fn text(value: impl Into<String>) -> Self {
        SnmpValue::Text(value.into())
    }
}

/// Rows of one fetched tree, one value per requested column.
pub type SnmpTable = Vec<Vec<SnmpValue>>;
