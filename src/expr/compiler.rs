//! Renders expression trees into parameterized SQL fragments.
//!
//! Constant leaves are lifted out of the text and registered in the
//! command's parameter set under fresh names; the rendered fragment refers
//! to them through the dialect's parameter tokens.

use crate::command::{Parameter, ParameterSet};
use crate::error::{CompileError, CompileResult};
use crate::expr::{Expr, SortDirection, SortSpec, UnaryOp};
use crate::strategy::dialect::SqlDialect;

/// One compilation pass over a filter/sort pair. Holds the shared parameter
/// set so that several fragments of one command draw from the same name
/// space.
pub struct ExpressionCompiler<'a> {
    dialect: &'a dyn SqlDialect,
    alias: &'a str,
    params: &'a mut ParameterSet,
}

impl<'a> ExpressionCompiler<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, alias: &'a str, params: &'a mut ParameterSet) -> Self {
        Self {
            dialect,
            alias,
            params,
        }
    }

    /// Render a predicate/value expression.
    pub fn compile(&mut self, expr: &Expr) -> CompileResult<String> {
        match expr {
            Expr::Nullary => Ok("(1 = 1)".to_string()),

            Expr::Binary { op, left, right } => {
                let token = op.token().ok_or(CompileError::UnsupportedOperator {
                    operator: op.name(),
                })?;
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                Ok(format!("({left} {token} {right})"))
            }

            Expr::Unary { op, operand } => {
                let inner = self.compile(operand)?;
                match op {
                    UnaryOp::Not => Ok(format!("NOT {inner}")),
                    UnaryOp::IsNull => Ok(format!("{inner} IS NULL")),
                    UnaryOp::IsNotNull => Ok(format!("{inner} IS NOT NULL")),
                    UnaryOp::Negate => Ok(format!("- {inner}")),
                    UnaryOp::Identity => Ok(format!("+ {inner}")),
                    UnaryOp::Increment => Ok(format!("({inner} + 1)")),
                    UnaryOp::Decrement => Ok(format!("({inner} - 1)")),
                    UnaryOp::BitNot => Ok(format!("~ {inner}")),
                    UnaryOp::Convert => Err(CompileError::UnsupportedOperator {
                        operator: op.name(),
                    }),
                }
            }

            Expr::Surface { column } => Ok(self.dialect.qualify_column(self.alias, column)),

            Expr::Value(value) => {
                // Nullability is expressed with IS [NOT] NULL, never with a
                // null constant: there is no type to infer from one.
                let provider_type = value.provider_type().ok_or(CompileError::NullConstant)?;
                let name = self.params.fresh_name();
                let token = self.dialect.parameter_token(&name);
                self.params
                    .add(Parameter::input(name, provider_type, value.clone()))
                    .map_err(CompileError::Schema)?;
                Ok(token)
            }

            Expr::Container(inner) => match inner {
                Some(expr) => self.compile(expr),
                None => Ok(String::new()),
            },

            Expr::Call { .. } => Err(CompileError::UnsupportedExpression {
                kind: expr.kind_name(),
            }),
        }
    }

    /// Render an ORDER BY list. Entries without a column expression are
    /// skipped; a missing direction defaults to ascending; an empty result
    /// falls back to the constant `1`, a stable no-op ordering.
    pub fn compile_sort(&mut self, sort: &[SortSpec]) -> CompileResult<String> {
        let mut rendered = Vec::new();
        for spec in sort {
            let Some(column) = &spec.column else {
                continue;
            };
            let column_sql = self.compile(column)?;
            let direction = spec.direction.unwrap_or(SortDirection::Ascending);
            rendered.push(format!("{column_sql} {}", direction.keyword()));
        }
        if rendered.is_empty() {
            Ok("1".to_string())
        } else {
            Ok(rendered.join(", "))
        }
    }
}
