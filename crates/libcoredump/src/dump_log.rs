//! Process-wide sink for dump diagnostics.
//!
//! Every dump attempt emits exactly one [`Record`]. Records are discarded
//! until a caller installs another [`Handler`] with [`set_handler`].

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::errors::DumpResult;

/// A structured diagnostic record: a message plus ordered key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub msg: &'static str,
    pub fields: Vec<(&'static str, String)>,
}

impl Record {
    pub fn new(msg: &'static str) -> Self {
        Self {
            msg,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    /// Look up the first field named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg={}", self.msg)?;
        for (key, value) in &self.fields {
            if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
                write!(f, " {key}={value:?}")?;
            } else {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Receives records. Implementations must swallow their own failures.
pub trait Handler: Send + Sync {
    fn log(&self, record: &Record);
}

impl<F> Handler for F
where
    F: Fn(&Record) + Send + Sync,
{
    fn log(&self, record: &Record) {
        self(record)
    }
}

/// Drops every record. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl Handler for DiscardHandler {
    fn log(&self, _record: &Record) {}
}

/// Forwards records to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl Handler for LogHandler {
    fn log(&self, record: &Record) {
        log::debug!(target: "coredump", "{record}");
    }
}

fn slot() -> &'static RwLock<Arc<dyn Handler>> {
    static SLOT: OnceLock<RwLock<Arc<dyn Handler>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Arc::new(DiscardHandler)))
}

/// Replace the handler. Applies to every later emission from either dumper.
pub fn set_handler(handler: impl Handler + 'static) {
    let mut guard = slot().write().unwrap_or_else(PoisonError::into_inner);
    *guard = Arc::new(handler);
}

/// Restore the discarding default.
pub fn reset_handler() {
    set_handler(DiscardHandler);
}

/// The `err` field: empty on success.
pub(crate) fn error_field<T>(result: &DumpResult<T>) -> String {
    match result {
        Ok(_) => String::new(),
        Err(err) => err.to_string(),
    }
}

pub(crate) fn emit(record: Record) {
    // Clone out so a slow handler never holds the lock.
    let handler = Arc::clone(&slot().read().unwrap_or_else(PoisonError::into_inner));
    handler.log(&record);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_display_quotes_awkward_values() {
        let record = Record::new("gcore")
            .with("pid", 12)
            .with("out", "saved corefile core.12")
            .with("err", "");
        assert_eq!(
            record.to_string(),
            r#"msg=gcore pid=12 out="saved corefile core.12" err="""#
        );
        assert_eq!(record.get("pid"), Some("12"));
        assert_eq!(record.get("prefix"), None);
    }
}
