//! Set-based update assignments

use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::EntityType;
use crate::query::sql::SqlWriter;

#[derive(Debug, Clone, PartialEq)]
enum Assignment {
    Set { column: String, value: DatabaseValue },
    Increment { column: String, delta: DatabaseValue },
}

/// SET clause of an `update_where` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    assignments: Vec<Assignment>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`
    pub fn set(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.assignments.push(Assignment::Set {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// `column = column + delta`
    pub fn increment(mut self, column: impl Into<String>, delta: impl Into<DatabaseValue>) -> Self {
        self.assignments.push(Assignment::Increment {
            column: column.into(),
            delta: delta.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub(crate) fn render(&self, w: &mut SqlWriter, entity_type: &EntityType) -> OrmResult<()> {
        if self.assignments.is_empty() {
            return Err(ModelError::Validation(format!(
                "Update of '{}' has no assignments",
                entity_type.name()
            )));
        }

        for (i, assignment) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            match assignment {
                Assignment::Set { column, value } => {
                    let column = entity_type.require_column(column)?.name;
                    w.push_identifier(column);
                    w.push(" = ");
                    w.push_param(value.clone());
                }
                Assignment::Increment { column, delta } => {
                    let column = entity_type.require_column(column)?.name;
                    w.push_identifier(column);
                    w.push(" = ");
                    w.push_identifier(column);
                    w.push(" + ");
                    w.push_param(delta.clone());
                }
            }
        }
        Ok(())
    }
}
