use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(OrganizationId);
id_newtype!(CategoryId);
id_newtype!(ProductId);
id_newtype!(InventoryId);
id_newtype!(TransactionId);
id_newtype!(StationId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
}

/// Why an inventory row changed. `Sale` rows carry negative quantity deltas;
/// `Adjust` records the delta between the counted and recorded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Sale,
    Add,
    Remove,
    Adjust,
}
