//! Compiled query text properties: parameter registration, token
//! uniqueness, and sort rendering, checked through the public strategy API.

mod helpers;

use helpers::{pg_strategy, Person};
use proptest::prelude::*;
use relmodel::{BinaryOp, Expr, Query, SortDirection, SortSpec};

/// Occurrences of `:name` in `text` not followed by another identifier
/// character, so `:p1` does not count inside `:p10`.
fn token_occurrences(text: &str, name: &str) -> usize {
    let token = format!(":{name}");
    let bytes = text.as_bytes();
    text.match_indices(&token)
        .filter(|(i, _)| {
            bytes
                .get(i + token.len())
                .map(|b| !b.is_ascii_alphanumeric() && *b != b'_')
                .unwrap_or(true)
        })
        .count()
}

#[test]
fn sort_spec_example_renders_name_asc_age_desc() {
    let strategy = pg_strategy();
    let query = Query::all()
        .order_by(SortSpec::by("name"))
        .order_by(SortSpec {
            column: None,
            direction: Some(SortDirection::Descending),
        })
        .order_by(SortSpec::by("age").descending());
    let compiled = strategy.select_query::<Person>(&query).unwrap();
    assert!(compiled
        .command
        .text()
        .ends_with("ORDER BY t0.name ASC, t0.age DESC"));
}

#[test]
fn empty_sort_falls_back_to_the_stable_constant() {
    let strategy = pg_strategy();
    let compiled = strategy.select_query::<Person>(&Query::all()).unwrap();
    assert!(compiled.command.text().ends_with("ORDER BY 1"));
}

proptest! {
    /// For an expression tree with N constant leaves, the compiled command
    /// carries exactly N parameters, and each parameter name appears
    /// exactly once in the text and once in the set.
    #[test]
    fn every_value_leaf_becomes_exactly_one_parameter(
        values in proptest::collection::vec(any::<i32>(), 1..12)
    ) {
        let strategy = pg_strategy();
        let mut filter: Option<Expr> = None;
        for value in &values {
            let clause = Expr::eq(Expr::column("age"), Expr::value(*value));
            filter = Some(match filter {
                Some(prior) => Expr::or(prior, clause),
                None => clause,
            });
        }
        let query = Query::new(filter.unwrap());
        let compiled = strategy.select_query::<Person>(&query).unwrap();

        let params = compiled.command.parameters();
        prop_assert_eq!(params.len(), values.len());
        for (i, value) in values.iter().enumerate() {
            let name = format!("p{i}");
            let parameter = params.get(&name);
            prop_assert!(parameter.is_some(), "parameter {} must be registered", name);
            prop_assert_eq!(
                parameter.unwrap().value.as_i64(),
                Some(*value as i64)
            );
            prop_assert_eq!(token_occurrences(compiled.command.text(), &name), 1);
        }
    }
}
