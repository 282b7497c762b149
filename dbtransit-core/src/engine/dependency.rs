//! Foreign-key dependency ordering.
//!
//! Tables are ordered so that every referenced table comes before the
//! tables referencing it. Ties and cycles resolve alphabetically by
//! qualified name (case-insensitive), so the order is deterministic.

use crate::models::{TableSchema, qualified_name};
use std::collections::{BTreeMap, BTreeSet};

/// Tables in dependency order plus any cycle warnings.
#[derive(Debug, Clone)]
pub struct OrderedTables {
    pub tables: Vec<TableSchema>,
    pub warnings: Vec<String>,
}

/// Orders `tables` referenced-first. References to tables outside the set
/// are ignored. A cycle is broken at its alphabetically first table.
pub fn order_tables(tables: Vec<TableSchema>) -> OrderedTables {
    let keys: Vec<String> = tables.iter().map(|t| t.full_name().to_lowercase()).collect();
    let index_of: BTreeMap<&str, usize> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| (key.as_str(), i))
        .collect();

    // dependencies[i] = tables i references; dependents[j] = tables referencing j
    let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); tables.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for fk in &table.foreign_keys {
            let Some(j) = resolve(&tables, &index_of, fk.referenced_schema.as_deref(), &fk.referenced_table) else {
                continue;
            };
            if i != j {
                dependencies[i].insert(j);
                dependents[j].insert(i);
            }
        }
    }

    let mut remaining: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<(&str, usize)> = (0..tables.len())
        .filter(|i| remaining[*i] == 0)
        .map(|i| (keys[i].as_str(), i))
        .collect();
    let mut placed = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());
    let mut warnings = Vec::new();

    while order.len() < tables.len() {
        let next = match ready.pop_first() {
            Some((_, i)) => i,
            None => {
                // Everything left sits on or behind a cycle.
                let Some((_, i)) = (0..tables.len())
                    .filter(|i| !placed[*i])
                    .map(|i| (keys[i].as_str(), i))
                    .min()
                else {
                    break;
                };
                let waiting: Vec<String> = dependencies[i]
                    .iter()
                    .filter(|d| !placed[**d])
                    .map(|d| tables[*d].full_name())
                    .collect();
                warnings.push(format!(
                    "Foreign key cycle: {} placed before {}",
                    tables[i].full_name(),
                    waiting.join(", ")
                ));
                i
            }
        };
        placed[next] = true;
        order.push(next);
        for dependent in &dependents[next] {
            if placed[*dependent] {
                continue;
            }
            remaining[*dependent] = remaining[*dependent].saturating_sub(1);
            if remaining[*dependent] == 0 {
                ready.insert((keys[*dependent].as_str(), *dependent));
            }
        }
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let mut slots: Vec<Option<TableSchema>> = tables.into_iter().map(Some).collect();
    let tables = order.into_iter().filter_map(|i| slots[i].take()).collect();
    OrderedTables { tables, warnings }
}

fn resolve(
    tables: &[TableSchema],
    index_of: &BTreeMap<&str, usize>,
    schema: Option<&str>,
    name: &str,
) -> Option<usize> {
    let key = qualified_name(schema, name).to_lowercase();
    if let Some(i) = index_of.get(key.as_str()) {
        return Some(*i);
    }
    if schema.is_some() {
        return None;
    }
    // Unqualified reference: accept a unique match by name.
    let mut matches = tables
        .iter()
        .enumerate()
        .filter(|(_, t)| t.name.eq_ignore_ascii_case(name));
    match (matches.next(), matches.next()) {
        (Some((i, _)), None) => Some(i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForeignKeyDefinition, ReferentialRule};

    fn table(name: &str, references: &[&str]) -> TableSchema {
        let mut table = TableSchema::new(name, Some("dbo".to_string()));
        table.foreign_keys = references
            .iter()
            .map(|r| ForeignKeyDefinition {
                name: format!("FK_{}_{}", name, r),
                columns: vec![format!("{}Id", r)],
                referenced_schema: Some("dbo".to_string()),
                referenced_table: r.to_string(),
                referenced_columns: vec!["Id".to_string()],
                update_rule: ReferentialRule::NoAction,
                delete_rule: ReferentialRule::NoAction,
            })
            .collect();
        table
    }

    fn names(ordered: &OrderedTables) -> Vec<&str> {
        ordered.tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_referenced_tables_first() {
        let ordered = order_tables(vec![
            table("OrderLines", &["Orders"]),
            table("Orders", &["Customers"]),
            table("Customers", &[]),
        ]);
        assert_eq!(names(&ordered), vec!["Customers", "Orders", "OrderLines"]);
        assert!(ordered.warnings.is_empty());
    }

    #[test]
    fn test_independent_tables_alphabetical() {
        let ordered = order_tables(vec![table("b", &[]), table("C", &[]), table("a", &[])]);
        assert_eq!(names(&ordered), vec!["a", "b", "C"]);
    }

    #[test]
    fn test_self_reference_and_external_reference_ignored() {
        let ordered = order_tables(vec![
            table("Employees", &["Employees", "Departments"]),
            table("Audit", &[]),
        ]);
        assert_eq!(names(&ordered), vec!["Audit", "Employees"]);
        assert!(ordered.warnings.is_empty());
    }

    #[test]
    fn test_cycle_broken_alphabetically() {
        let ordered = order_tables(vec![
            table("Zeta", &["Alpha"]),
            table("Alpha", &["Zeta"]),
            table("Child", &["Alpha"]),
        ]);
        assert_eq!(names(&ordered), vec!["Alpha", "Child", "Zeta"]);
        assert_eq!(ordered.warnings.len(), 1);
        assert!(ordered.warnings[0].contains("dbo.Alpha"));
    }

    #[test]
    fn test_unqualified_reference_resolves_by_name() {
        let mut child = table("Orders", &[]);
        child.foreign_keys = table("Orders", &["Customers"]).foreign_keys;
        child.foreign_keys[0].referenced_schema = None;
        let ordered = order_tables(vec![child, table("Customers", &[])]);
        assert_eq!(names(&ordered), vec!["Customers", "Orders"]);
    }
}
