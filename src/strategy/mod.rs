//! The query compiler: turns descriptors, models, and queries into
//! executable commands.
//!
//! All SQL this engine runs is produced here, parameterized end to end.
//! Everything provider-specific goes through [`dialect::SqlDialect`].

pub mod dialect;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::command::{
    Command, CommandBehavior, CommandKind, CommandVerb, CompiledCommand, Parameter, ParameterSet,
    RecordMapper,
};
use crate::error::{CompileError, EngineResult, SchemaError};
use crate::expr::compiler::ExpressionCompiler;
use crate::expr::{Expr, Query};
use crate::model::{CallModel, ResultModel, TableModel};
use crate::schema::{ColumnSchema, ProcedureParamSchema, SchemaRegistry, TableSchema};
use crate::strategy::dialect::SqlDialect;
use crate::value::ScalarValue;

/// Alias used for the driving table in select statements.
const TABLE_ALIAS: &str = "t0";

/// Compiles commands for one store dialect against one descriptor registry.
pub struct SqlStrategy {
    registry: Arc<SchemaRegistry>,
    dialect: Arc<dyn SqlDialect>,
    command_timeout: Duration,
}

impl SqlStrategy {
    pub fn new(registry: Arc<SchemaRegistry>, dialect: Arc<dyn SqlDialect>) -> Self {
        let command_timeout = std::env::var("RELMODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        Self {
            registry,
            dialect,
            command_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Single-row select keyed on the model's primary key. The filter is the
    /// synthesized equality predicate over the declared key columns.
    pub fn select_by_key<M: TableModel>(&self, model: &M) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;
        let mut filter: Option<Expr> = None;
        for column in schema.require_key()? {
            let value = self.key_value(&schema, column, model)?;
            let clause = Expr::eq(Expr::column(column.name.clone()), Expr::Value(value));
            filter = Some(match filter {
                Some(prior) => Expr::and(prior, clause),
                None => clause,
            });
        }
        let query = Query::new(filter.expect("require_key returned a non-empty key"));
        self.build_select(schema, query, true)
    }

    /// Multi-row select from an explicit query. No affected-row contract is
    /// enforced for this form.
    pub fn select_query<M: TableModel>(&self, query: &Query) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;
        self.build_select(schema, query.clone(), false)
    }

    /// Parameterized insert over the writable columns. When the dialect
    /// supports batch-scope identity the generated key comes back with the
    /// insert itself; otherwise a separate identify command follows.
    pub fn insert<M: TableModel>(&self, model: &M) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;
        schema.require_key()?;

        let mut params = ParameterSet::new();
        let mut columns = Vec::new();
        let mut tokens = Vec::new();
        for column in schema.require_writable()? {
            let value = model.get_field(&column.name).unwrap_or(ScalarValue::Null);
            columns.push(column.name.clone());
            tokens.push(self.dialect.parameter_token(&column.name));
            params
                .add(column_parameter(column, value))
                .map_err(CompileError::Schema)?;
        }

        let mut text = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_reference(&schema),
            columns.join(", "),
            tokens.join(", ")
        );
        let mut batch_scope = false;
        if self.dialect.batch_scope_identity() {
            if let Ok(key) = schema.identity_column() {
                if let Some(clause) = self.dialect.insert_returning(&key.name) {
                    text.push_str(&clause);
                    batch_scope = true;
                }
            }
        }

        let mut command = Command::new(CommandVerb::Insert, CommandKind::Text, text);
        command.parameters = params;
        command.timeout = self.command_timeout;
        command.prepare = true;
        command.expected_affected = 0;
        command.batch_scope_identity = batch_scope;
        command.table = Some(Arc::clone(&schema));
        debug!(table = %schema.table, sql = %command.text, "compiled insert command");
        Ok(CompiledCommand::new(command, table_mapper(schema)))
    }

    /// Parameterized update: writable columns in the SET list, primary-key
    /// equality in the predicate.
    pub fn update<M: TableModel>(&self, model: &M) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;

        let mut params = ParameterSet::new();
        let mut assignments = Vec::new();
        for column in schema.require_writable()? {
            let value = model.get_field(&column.name).unwrap_or(ScalarValue::Null);
            assignments.push(format!(
                "{} = {}",
                column.name,
                self.dialect.parameter_token(&column.name)
            ));
            params
                .add(column_parameter(column, value))
                .map_err(CompileError::Schema)?;
        }
        let predicate = self.key_predicate(&schema, model, &mut params)?;

        let text = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table_reference(&schema),
            assignments.join(", "),
            predicate
        );
        let mut command = Command::new(CommandVerb::Update, CommandKind::Text, text);
        command.parameters = params;
        command.timeout = self.command_timeout;
        command.prepare = true;
        command.expected_affected = 0;
        command.table = Some(Arc::clone(&schema));
        debug!(table = %schema.table, sql = %command.text, "compiled update command");
        Ok(CompiledCommand::new(command, table_mapper(schema)))
    }

    /// Parameterized delete on primary-key equality.
    pub fn delete<M: TableModel>(&self, model: &M) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;

        let mut params = ParameterSet::new();
        let predicate = self.key_predicate(&schema, model, &mut params)?;

        let text = format!(
            "DELETE FROM {} WHERE {}",
            self.table_reference(&schema),
            predicate
        );
        let mut command = Command::new(CommandVerb::Delete, CommandKind::Text, text);
        command.parameters = params;
        command.timeout = self.command_timeout;
        command.prepare = true;
        command.expected_affected = 0;
        command.table = Some(Arc::clone(&schema));
        debug!(table = %schema.table, sql = %command.text, "compiled delete command");
        Ok(CompiledCommand::new(command, table_mapper(schema)))
    }

    /// Post-insert key retrieval through the provider identity query. Only
    /// meaningful when the insert did not use batch-scope identity.
    pub fn identify<M: TableModel>(&self) -> EngineResult<CompiledCommand<M>> {
        let schema = self.registry.table::<M>()?;
        let key = schema.identity_column()?;

        let text = self.dialect.identity_query(&schema, key);
        let mut command = Command::new(CommandVerb::Identify, CommandKind::Text, text);
        command.timeout = self.command_timeout;
        command.behavior = CommandBehavior::SingleRow;
        command.expected_affected = 1;
        command.nullipotent = true;
        command.table = Some(Arc::clone(&schema));
        debug!(table = %schema.table, sql = %command.text, "compiled identify command");
        Ok(CompiledCommand::new(command, table_mapper(schema)))
    }

    /// Stored-procedure call: call-model properties become input parameters;
    /// output/return parameters are declared from the procedure descriptor.
    /// Procedures affect a variable number of rows, so no affected-row
    /// contract is set.
    pub fn call<C: CallModel, R: ResultModel>(
        &self,
        call: &C,
    ) -> EngineResult<CompiledCommand<R>> {
        let procedure = self.registry.procedure::<C>()?;

        let mut params = ParameterSet::new();
        for declared in &procedure.params {
            let value = match declared.direction {
                crate::command::ParameterDirection::Input
                | crate::command::ParameterDirection::InputOutput => call
                    .get_field(&declared.name)
                    .unwrap_or(ScalarValue::Null),
                _ => ScalarValue::Null,
            };
            params
                .add(procedure_parameter(declared, value))
                .map_err(CompileError::Schema)?;
        }

        let text = self
            .dialect
            .table_reference(procedure.namespace.as_deref(), &procedure.procedure);
        let mut command = Command::new(CommandVerb::Call, CommandKind::Procedure, text);
        command.parameters = params;
        command.timeout = self.command_timeout;
        command.procedure = Some(Arc::clone(&procedure));
        debug!(procedure = %procedure.procedure, "compiled procedure command");
        Ok(CompiledCommand::new(command, result_mapper::<R>()))
    }

    fn build_select<M: TableModel>(
        &self,
        schema: Arc<TableSchema>,
        query: Query,
        single_row: bool,
    ) -> EngineResult<CompiledCommand<M>> {
        let mut params = ParameterSet::new();
        let (where_sql, order_sql) = {
            let mut compiler =
                ExpressionCompiler::new(self.dialect.as_ref(), TABLE_ALIAS, &mut params);
            let where_sql = compiler.compile(&query.filter)?;
            let order_sql = compiler.compile_sort(&query.sort)?;
            (where_sql, order_sql)
        };

        let select_list = schema
            .columns
            .iter()
            .map(|c| self.dialect.qualify_column(TABLE_ALIAS, &c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut text = format!(
            "SELECT {} FROM {} {}",
            select_list,
            self.table_reference(&schema),
            TABLE_ALIAS
        );
        if !where_sql.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&where_sql);
        }
        text.push_str(" ORDER BY ");
        text.push_str(&order_sql);

        let mut command = Command::new(CommandVerb::Select, CommandKind::Text, text);
        command.parameters = params;
        command.timeout = self.command_timeout;
        command.prepare = single_row;
        command.behavior = if single_row {
            CommandBehavior::SingleRow
        } else {
            CommandBehavior::Standard
        };
        command.expected_affected = if single_row { 1 } else { 0 };
        command.nullipotent = true;
        command.table = Some(Arc::clone(&schema));
        command.query = Some(query);
        debug!(table = %schema.table, sql = %command.text, "compiled select command");
        Ok(CompiledCommand::new(command, table_mapper(schema)))
    }

    fn table_reference(&self, schema: &TableSchema) -> String {
        self.dialect
            .table_reference(schema.namespace.as_deref(), &schema.table)
    }

    /// Key-equality predicate over bare column names, for DML statements.
    fn key_predicate<M: TableModel>(
        &self,
        schema: &Arc<TableSchema>,
        model: &M,
        params: &mut ParameterSet,
    ) -> EngineResult<String> {
        let mut clauses = Vec::new();
        for column in schema.require_key()? {
            let value = self.key_value(schema, column, model)?;
            clauses.push(format!(
                "{} = {}",
                column.name,
                self.dialect.parameter_token(&column.name)
            ));
            params
                .add(column_parameter(column, value))
                .map_err(CompileError::Schema)?;
        }
        Ok(clauses.join(" AND "))
    }

    fn key_value<M: TableModel>(
        &self,
        schema: &Arc<TableSchema>,
        column: &ColumnSchema,
        model: &M,
    ) -> EngineResult<ScalarValue> {
        match model.get_field(&column.name) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(SchemaError::MissingKeyValue {
                table: schema.table.clone(),
                column: column.name.clone(),
            }
            .into()),
        }
    }
}

fn column_parameter(column: &ColumnSchema, value: ScalarValue) -> Parameter {
    Parameter {
        name: column.name.clone(),
        direction: crate::command::ParameterDirection::Input,
        provider_type: column.provider_type,
        nullable: column.nullable,
        size: column.size,
        precision: column.precision,
        scale: column.scale,
        value,
    }
}

fn procedure_parameter(declared: &ProcedureParamSchema, value: ScalarValue) -> Parameter {
    Parameter {
        name: declared.name.clone(),
        direction: declared.direction,
        provider_type: declared.provider_type,
        nullable: declared.nullable,
        size: declared.size,
        precision: declared.precision,
        scale: declared.scale,
        value,
    }
}

/// Schema-driven mapper: copies each declared column present in the record
/// onto the model.
fn table_mapper<M: TableModel>(schema: Arc<TableSchema>) -> RecordMapper<M> {
    Arc::new(move |record, model| {
        for column in &schema.columns {
            if let Some(value) = record.get(&column.name) {
                model.set_field(&column.name, value.clone())?;
            }
        }
        Ok(())
    })
}

/// Procedure-row mapper: copies every record field onto the row model.
fn result_mapper<R: ResultModel>() -> RecordMapper<R> {
    Arc::new(|record, model| {
        for (name, value) in record.fields() {
            model.set_field(name, value.clone())?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::dialect::{MssqlDialect, PostgresDialect};
    use super::*;
    use crate::error::EngineError;
    use crate::expr::SortSpec;
    use crate::model::{FieldAccess, ModelEvents};
    use crate::value::ProviderType;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Person {
        person_id: Option<i64>,
        name: String,
        age: Option<i32>,
        is_new: bool,
    }

    impl FieldAccess for Person {
        fn get_field(&self, name: &str) -> Option<ScalarValue> {
            match name {
                "person_id" => Some(self.person_id.into()),
                "name" => Some(self.name.as_str().into()),
                "age" => Some(self.age.into()),
                _ => None,
            }
        }

        fn set_field(&mut self, name: &str, value: ScalarValue) -> EngineResult<()> {
            match name {
                "person_id" => self.person_id = value.as_i64(),
                "name" => self.name = value.as_text().unwrap_or_default().to_string(),
                "age" => self.age = value.as_i64().map(|v| v as i32),
                _ => {}
            }
            Ok(())
        }
    }

    impl ModelEvents for Person {}

    impl TableModel for Person {
        fn is_new(&self) -> bool {
            self.is_new
        }

        fn mark(&mut self) {
            self.is_new = false;
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry.register_table::<Person>(TableSchema::new(
            "people",
            vec![
                ColumnSchema::new("person_id", ProviderType::Int64).primary_key(),
                ColumnSchema::new("name", ProviderType::Text).size(200),
                ColumnSchema::new("age", ProviderType::Int32).nullable(),
            ],
        ));
        Arc::new(registry)
    }

    fn postgres_strategy() -> SqlStrategy {
        SqlStrategy::new(registry(), Arc::new(PostgresDialect))
    }

    #[test]
    fn test_insert_shape_postgres() {
        let strategy = postgres_strategy();
        let person = Person {
            name: "ada".into(),
            age: Some(36),
            is_new: true,
            ..Person::default()
        };
        let compiled = strategy.insert(&person).unwrap();
        assert_eq!(
            compiled.command.text(),
            "INSERT INTO people (name, age) VALUES (:name, :age) RETURNING person_id"
        );
        assert!(compiled.command.batch_scope_identity());
        assert_eq!(compiled.command.expected_affected(), 0);
        assert_eq!(compiled.command.parameters().len(), 2);
    }

    #[test]
    fn test_insert_shape_mssql_has_no_returning() {
        let strategy = SqlStrategy::new(registry(), Arc::new(MssqlDialect));
        let person = Person {
            name: "ada".into(),
            is_new: true,
            ..Person::default()
        };
        let compiled = strategy.insert(&person).unwrap();
        assert_eq!(
            compiled.command.text(),
            "INSERT INTO [people] (name, age) VALUES (@name, @age)"
        );
        assert!(!compiled.command.batch_scope_identity());
    }

    #[test]
    fn test_update_and_delete_key_predicate() {
        let strategy = postgres_strategy();
        let person = Person {
            person_id: Some(7),
            name: "ada".into(),
            ..Person::default()
        };
        let update = strategy.update(&person).unwrap();
        assert_eq!(
            update.command.text(),
            "UPDATE people SET name = :name, age = :age WHERE person_id = :person_id"
        );
        let delete = strategy.delete(&person).unwrap();
        assert_eq!(
            delete.command.text(),
            "DELETE FROM people WHERE person_id = :person_id"
        );
        assert_eq!(delete.command.parameters().len(), 1);
    }

    #[test]
    fn test_missing_key_value_fails_at_compile_time() {
        let strategy = postgres_strategy();
        let person = Person::default();
        let result = strategy.delete(&person);
        assert!(matches!(
            result,
            Err(EngineError::Compile(CompileError::Schema(
                SchemaError::MissingKeyValue { .. }
            )))
        ));
    }

    #[test]
    fn test_select_by_key_synthesizes_predicate() {
        let strategy = postgres_strategy();
        let person = Person {
            person_id: Some(7),
            ..Person::default()
        };
        let compiled = strategy.select_by_key(&person).unwrap();
        assert_eq!(
            compiled.command.text(),
            "SELECT t0.person_id, t0.name, t0.age FROM people t0 \
             WHERE (t0.person_id = :p0) ORDER BY 1"
        );
        assert_eq!(compiled.command.expected_affected(), 1);
        assert_eq!(compiled.command.behavior(), CommandBehavior::SingleRow);
        assert!(compiled.command.is_nullipotent());
    }

    #[test]
    fn test_select_query_with_sort() {
        let strategy = postgres_strategy();
        let query = Query::new(Expr::eq(Expr::column("name"), Expr::value("ada")))
            .order_by(SortSpec::by("age").descending());
        let compiled = strategy.select_query::<Person>(&query).unwrap();
        assert_eq!(
            compiled.command.text(),
            "SELECT t0.person_id, t0.name, t0.age FROM people t0 \
             WHERE (t0.name = :p0) ORDER BY t0.age DESC"
        );
        assert_eq!(compiled.command.expected_affected(), 0);
        assert_eq!(compiled.command.behavior(), CommandBehavior::Standard);
    }

    #[test]
    fn test_identify_command_is_strict_single_row() {
        let strategy = SqlStrategy::new(registry(), Arc::new(MssqlDialect));
        let compiled = strategy.identify::<Person>().unwrap();
        assert_eq!(
            compiled.command.text(),
            "SELECT CAST(SCOPE_IDENTITY() AS bigint) AS person_id"
        );
        assert_eq!(compiled.command.expected_affected(), 1);
        assert_eq!(compiled.command.verb(), CommandVerb::Identify);
    }
}
