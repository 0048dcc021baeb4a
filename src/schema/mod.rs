//! Mapping descriptors and the ahead-of-time descriptor registry.
//!
//! Every model type the engine touches is described by a descriptor built
//! once at startup and registered by model type. The strategy looks
//! descriptors up at compile time; there is no per-call reflection.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::ParameterDirection;
use crate::error::{SchemaError, SchemaResult};
use crate::value::ProviderType;

/// Declared shape of one table column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub ordinal: u16,
    pub provider_type: ProviderType,
    pub nullable: bool,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub primary_key: bool,
    pub read_only: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            provider_type,
            nullable: false,
            size: None,
            precision: None,
            scale: None,
            primary_key: false,
            read_only: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// Declared shape of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub namespace: Option<String>,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, mut columns: Vec<ColumnSchema>) -> Self {
        for (i, column) in columns.iter_mut().enumerate() {
            column.ordinal = i as u16;
        }
        Self {
            table: table.into(),
            namespace: None,
            columns,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> SchemaResult<&ColumnSchema> {
        self.column(name).ok_or_else(|| SchemaError::UnknownColumn {
            table: self.table.clone(),
            column: name.to_string(),
        })
    }

    /// Primary-key columns in declaration order.
    pub fn key_columns(&self) -> Vec<&ColumnSchema> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Primary-key columns, failing when the table declares none.
    pub fn require_key(&self) -> SchemaResult<Vec<&ColumnSchema>> {
        let key = self.key_columns();
        if key.is_empty() {
            return Err(SchemaError::MissingPrimaryKey {
                table: self.table.clone(),
            });
        }
        Ok(key)
    }

    /// The single identity column, for post-insert key retrieval.
    pub fn identity_column(&self) -> SchemaResult<&ColumnSchema> {
        let key = self.require_key()?;
        if key.len() != 1 {
            return Err(SchemaError::AmbiguousIdentity {
                table: self.table.clone(),
            });
        }
        Ok(key[0])
    }

    /// Columns included in insert/update write lists: neither key nor
    /// read-only. Read-only columns stay in the returned row shape.
    pub fn writable_columns(&self) -> Vec<&ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| !c.primary_key && !c.read_only)
            .collect()
    }

    pub fn require_writable(&self) -> SchemaResult<Vec<&ColumnSchema>> {
        let writable = self.writable_columns();
        if writable.is_empty() {
            return Err(SchemaError::NoWritableColumns {
                table: self.table.clone(),
            });
        }
        Ok(writable)
    }
}

/// Declared shape of one stored-procedure parameter.
#[derive(Debug, Clone)]
pub struct ProcedureParamSchema {
    pub name: String,
    pub direction: ParameterDirection,
    pub provider_type: ProviderType,
    pub nullable: bool,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl ProcedureParamSchema {
    pub fn new(
        name: impl Into<String>,
        direction: ParameterDirection,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            provider_type,
            nullable: false,
            size: None,
            precision: None,
            scale: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Declared shape of one stored procedure.
#[derive(Debug, Clone)]
pub struct ProcedureSchema {
    pub procedure: String,
    pub namespace: Option<String>,
    pub params: Vec<ProcedureParamSchema>,
}

impl ProcedureSchema {
    pub fn new(procedure: impl Into<String>, params: Vec<ProcedureParamSchema>) -> Self {
        Self {
            procedure: procedure.into(),
            namespace: None,
            params,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Descriptor registry keyed by model type. Built once at startup, then
/// shared read-only with the strategy.
#[derive(Default)]
pub struct SchemaRegistry {
    tables: HashMap<TypeId, Arc<TableSchema>>,
    procedures: HashMap<TypeId, Arc<ProcedureSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table<M: 'static>(&mut self, schema: TableSchema) -> &mut Self {
        self.tables.insert(TypeId::of::<M>(), Arc::new(schema));
        self
    }

    pub fn register_procedure<C: 'static>(&mut self, schema: ProcedureSchema) -> &mut Self {
        self.procedures.insert(TypeId::of::<C>(), Arc::new(schema));
        self
    }

    pub fn table<M: 'static>(&self) -> SchemaResult<Arc<TableSchema>> {
        self.tables
            .get(&TypeId::of::<M>())
            .cloned()
            .ok_or_else(|| SchemaError::UnknownModel {
                model: std::any::type_name::<M>().to_string(),
            })
    }

    pub fn procedure<C: 'static>(&self) -> SchemaResult<Arc<ProcedureSchema>> {
        self.procedures
            .get(&TypeId::of::<C>())
            .cloned()
            .ok_or_else(|| SchemaError::UnknownProcedure {
                call: std::any::type_name::<C>().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    fn widget_schema() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("widget_id", ProviderType::Int64).primary_key(),
                ColumnSchema::new("name", ProviderType::Text).size(120),
                ColumnSchema::new("updated_at", ProviderType::Timestamp).read_only(),
            ],
        )
    }

    #[test]
    fn test_ordinals_assigned_in_declaration_order() {
        let schema = widget_schema();
        assert_eq!(schema.column("widget_id").unwrap().ordinal, 0);
        assert_eq!(schema.column("updated_at").unwrap().ordinal, 2);
    }

    #[test]
    fn test_writable_excludes_key_and_read_only() {
        let schema = widget_schema();
        let writable: Vec<_> = schema.writable_columns().iter().map(|c| c.name.clone()).collect();
        assert_eq!(writable, vec!["name".to_string()]);
    }

    #[test]
    fn test_registry_lookup_by_model_type() {
        let mut registry = SchemaRegistry::new();
        registry.register_table::<Widget>(widget_schema());
        assert_eq!(registry.table::<Widget>().unwrap().table, "widgets");

        struct Other;
        assert!(matches!(
            registry.table::<Other>(),
            Err(SchemaError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_missing_primary_key_detected() {
        let schema = TableSchema::new(
            "log_lines",
            vec![ColumnSchema::new("message", ProviderType::Text)],
        );
        assert!(matches!(
            schema.require_key(),
            Err(SchemaError::MissingPrimaryKey { .. })
        ));
    }
}
