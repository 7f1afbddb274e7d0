use failscope_core::{FilterField, FilterSet, RESOLVED_STATUS, ScopeId};
use rusqlite::types::Value;

pub(crate) fn column(field: FilterField) -> &'static str {
    match field {
        FilterField::Station => "station",
        FilterField::Config => "config",
        FilterField::Test => "failed_test",
        FilterField::TestId => "test_id",
        FilterField::FailureType => "failure_type",
        FilterField::Location => "failed_location",
        FilterField::Symptom => "symptom",
        FilterField::Status => "fa_status",
        FilterField::Priority => "priority",
        FilterField::SampleStatus => "sample_status",
        FilterField::Department => "department",
        FilterField::FunctionCosmetic => "function_or_cosmetic",
    }
}

/// Parameterized WHERE clause over the `issues` table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IssuePredicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl IssuePredicate {
    pub(crate) fn build(scope: ScopeId, filters: &FilterSet, exclude_resolved: bool) -> Self {
        let mut sql = String::from("scope_id = ?");
        let mut params = vec![Value::Integer(scope)];

        if exclude_resolved {
            sql.push_str(&format!(
                " AND (fa_status IS NULL OR lower(trim(fa_status)) <> '{RESOLVED_STATUS}')"
            ));
        }

        if let Some(from) = filters.date_from {
            sql.push_str(" AND open_date >= ?");
            params.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filters.date_to {
            sql.push_str(" AND open_date <= ?");
            params.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }

        for field in FilterField::ALL {
            let values = filters.list(field);
            if values.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; values.len()].join(",");
            sql.push_str(&format!(
                " AND trim({}) IN ({placeholders})",
                column(field)
            ));
            params.extend(values.iter().cloned().map(Value::Text));
        }

        for (column, needle) in [
            ("serial_number", filters.serial_search.as_deref()),
            ("fa_number", filters.fa_search.as_deref()),
            ("unit_number", filters.unit_search.as_deref()),
        ] {
            if let Some(needle) = needle {
                sql.push_str(&format!(" AND instr(lower({column}), lower(?)) > 0"));
                params.push(Value::Text(needle.to_owned()));
            }
        }

        Self { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_emits_placeholders_in_parameter_order() {
        let filters = FilterSet {
            stations: vec!["1".to_owned(), "2".to_owned()],
            symptoms: vec!["Rattle".to_owned()],
            fa_search: Some("FA-".to_owned()),
            ..FilterSet::default()
        };

        let predicate = IssuePredicate::build(7, &filters, true);

        assert_eq!(
            predicate.sql,
            "scope_id = ? AND (fa_status IS NULL OR lower(trim(fa_status)) <> 'retest pass') \
             AND trim(station) IN (?,?) AND trim(symptom) IN (?) AND instr(lower(fa_number), lower(?)) > 0"
        );
        assert_eq!(
            predicate.params,
            vec![
                Value::Integer(7),
                Value::Text("1".to_owned()),
                Value::Text("2".to_owned()),
                Value::Text("Rattle".to_owned()),
                Value::Text("FA-".to_owned()),
            ]
        );
    }

    #[test]
    fn build_without_filters_only_scopes_the_query() {
        let predicate = IssuePredicate::build(1, &FilterSet::default(), false);
        assert_eq!(predicate.sql, "scope_id = ?");
        assert_eq!(predicate.params, vec![Value::Integer(1)]);
    }
}
