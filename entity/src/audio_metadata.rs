use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per uploaded audio object, keyed by its object store URL.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audio_metadata")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub gcp_url: String,
    pub file_name: String,
    pub duration_ms: i64,
    #[sea_orm(column_type = "Double")]
    pub loudness: f64,
    pub classification: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
