use coursedesk_events::stream_query::FilterEvaluator;
use coursedesk_events::{StreamFilter, StreamQuery};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

/// SQL Criteria Builder
///
/// Appends the `WHERE` criteria selecting the events of a stream query to a query builder.
/// Every value is pushed as a bind parameter.
pub struct CriteriaBuilder<'b, 'args> {
    builder: &'b mut QueryBuilder<'args, Postgres>,
}

impl<'b, 'args> CriteriaBuilder<'b, 'args> {
    pub fn new(builder: &'b mut QueryBuilder<'args, Postgres>) -> Self {
        Self { builder }
    }

    /// Pushes the origin, the excluded events and the filter of the query.
    pub fn push_query<E>(mut self, query: &StreamQuery<E>) {
        self.builder.push("(event_id > ");
        self.builder.push_bind(query.origin());
        self.builder.push(")");

        if !query.excluded_events().is_empty() {
            self.builder.push(" AND NOT (event_type = ANY(");
            self.builder.push_bind(names(query.excluded_events()));
            self.builder.push("))");
        }

        if let Some(filter) = query.filter() {
            self.builder.push(" AND ");
            self.eval(filter);
        }
    }
}

impl FilterEvaluator for CriteriaBuilder<'_, '_> {
    type Result = ();

    fn eval(&mut self, filter: &StreamFilter) {
        match filter {
            StreamFilter::Events { names: [] } => {
                self.builder.push("FALSE");
            }
            StreamFilter::Events { names: events } => {
                self.builder.push("event_type = ANY(");
                self.builder.push_bind(names(events));
                self.builder.push(")");
            }
            StreamFilter::Eq { ident, value } => {
                let mut containment = Map::new();
                containment.insert(ident.to_string(), Value::String(value.clone()));
                self.builder.push("domain_ids @> ");
                self.builder.push_bind(Json(Value::Object(containment)));
            }
            StreamFilter::And { l, r } => {
                self.builder.push("(");
                self.eval(l);
                self.builder.push(" AND ");
                self.eval(r);
                self.builder.push(")");
            }
            StreamFilter::Or { l, r } => {
                self.builder.push("(");
                self.eval(l);
                self.builder.push(" OR ");
                self.eval(r);
                self.builder.push(")");
            }
        }
    }
}

fn names(events: &[&str]) -> Vec<String> {
    events.iter().map(|name| name.to_string()).collect()
}
