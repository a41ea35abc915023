//! Statement classification, pagination injection and batch execution shared
//! by every engine adapter.

mod classifier;
mod dialect;
mod executor;
mod introspection;
mod lexer;
mod pagination;

pub use classifier::{
    classify, has_limiting_clause, is_insert_statement, split_statements, strip_leading_comments,
};
pub use dialect::{PaginationStyle, quote_ident, quote_literal};
pub use executor::{ExecutionOutcome, StatementRunner, run_batch, with_timeout};
pub use introspection::{IntrospectionCommand, TableRef};
pub use pagination::{count_query, paginate};
