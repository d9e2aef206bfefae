use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tsq_common::Result;
use tsq_ql::DataType;

use crate::traits::Database;

/// The databases resolved for one statement's sources, with widest-type
/// metadata merging across them.
#[derive(Clone, Default)]
pub struct DatabaseSet {
    databases: Vec<Arc<dyn Database>>,
}

impl DatabaseSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one resolved database.
    pub fn push(&mut self, db: Arc<dyn Database>) {
        self.databases.push(db);
    }

    /// The resolved databases, in source order.
    pub fn databases(&self) -> &[Arc<dyn Database>] {
        &self.databases
    }

    /// Returns true when no source resolved to storage.
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// Merged field/dimension metadata. When databases disagree on a
    /// field's type the widest type wins.
    pub fn field_dimensions(&self) -> Result<(HashMap<String, DataType>, BTreeSet<String>)> {
        let mut fields: HashMap<String, DataType> = HashMap::new();
        let mut dimensions: BTreeSet<String> = BTreeSet::new();
        for db in &self.databases {
            let (f, d) = db.field_dimensions()?;
            for (name, typ) in f {
                let merged = fields
                    .get(&name)
                    .copied()
                    .unwrap_or(DataType::Unknown)
                    .merge(typ);
                fields.insert(name, merged);
            }
            dimensions.extend(d);
        }
        Ok((fields, dimensions))
    }

    /// Widest observed type of `field` across the set.
    pub fn map_type(&self, field: &str) -> DataType {
        let mut typ = DataType::Unknown;
        for db in &self.databases {
            typ = typ.merge(db.map_type(field));
        }
        typ
    }

    /// Close every database, keeping the first error.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for db in &self.databases {
            if let Err(e) = db.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
