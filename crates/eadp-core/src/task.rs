//! Task model: atomic bus operations and command decomposition.
//!
//! A client command such as `SE 1/0/1=FF,1/0/2=00` first becomes one
//! un-decomposed [`Task`] carrying the raw body. [`Task::extract`] then splits
//! it into one task per target, in the order the targets appeared. That
//! order is the order the bus sees the telegrams.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::error::TaskError;

// ============================================================================
// Identifiers
// ============================================================================

/// Process-wide task counter; ids are unique and creation-ordered.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, creation-ordered task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates the next identifier.
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

// ============================================================================
// Command Kind
// ============================================================================

/// Command kinds of the EADP protocol, keyed by their 2-letter header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `CH` - login handshake
    Helo,
    /// `RE` - read group values
    Read,
    /// `SE` - write group values
    Send,
    /// `WE` - subscribe to group values
    Watch,
    /// `UE` - unsubscribe from group values
    Unwatch,
    /// `QE` - leave the session
    Bye,
}

impl CommandKind {
    /// All command kinds.
    pub const ALL: [CommandKind; 6] = [
        Self::Helo,
        Self::Read,
        Self::Send,
        Self::Watch,
        Self::Unwatch,
        Self::Bye,
    ];

    /// Looks up the kind for a command header.
    pub fn from_header(header: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.header() == header)
    }

    /// Returns the command header.
    pub const fn header(self) -> &'static str {
        match self {
            Self::Helo => "CH",
            Self::Read => "RE",
            Self::Send => "SE",
            Self::Watch => "WE",
            Self::Unwatch => "UE",
            Self::Bye => "QE",
        }
    }

    /// Bus operation issued for tasks of this kind, if any.
    ///
    /// Watching reads the current value once; unwatching is purely local.
    pub const fn bus_op(self) -> Option<BusOp> {
        match self {
            Self::Read | Self::Watch => Some(BusOp::Read),
            Self::Send => Some(BusOp::Write),
            Self::Helo | Self::Unwatch | Self::Bye => None,
        }
    }

    /// Whether decomposed tasks of this kind carry a value.
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Send)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Helo => "helo",
            Self::Read => "read",
            Self::Send => "send",
            Self::Watch => "watch",
            Self::Unwatch => "unwatch",
            Self::Bye => "bye",
        };
        write!(f, "{name}")
    }
}

/// Bus-level operation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusOp {
    Read,
    Write,
}

// ============================================================================
// Task
// ============================================================================

/// One bus operation, either still compound (fresh from the client) or
/// decomposed to a single group address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    created_at: DateTime<Utc>,
    raw_command: String,
    kind: CommandKind,
    body: String,
    group_address: Option<String>,
    value: Option<String>,
    response: Option<String>,
}

impl Task {
    /// Creates an un-decomposed task from a raw client command.
    ///
    /// The header is the first whitespace-delimited token; the body is the
    /// remainder.
    ///
    /// # Errors
    ///
    /// `TaskError::UnknownHeader` if the header names no command.
    pub fn from_raw(raw_command: &str) -> Result<Self, TaskError> {
        let raw = raw_command.trim();
        let (header, body) = raw
            .split_once(char::is_whitespace)
            .map(|(h, b)| (h, b.trim()))
            .unwrap_or((raw, ""));

        let kind = CommandKind::from_header(header).ok_or_else(|| TaskError::UnknownHeader {
            header: header.to_string(),
        })?;

        Ok(Self {
            id: TaskId::next(),
            created_at: Utc::now(),
            raw_command: raw.to_string(),
            kind,
            body: body.to_string(),
            group_address: None,
            value: None,
            response: None,
        })
    }

    /// Decomposes the task into one task per comma-separated target.
    ///
    /// Write targets are `address=value` pairs; every other kind takes the
    /// whole item as the address. Output order matches input order.
    ///
    /// # Errors
    ///
    /// - `TaskError::EmptyBody` if there are no targets
    /// - `TaskError::InvalidTarget` for an empty item or a write item
    ///   without exactly one `=`
    pub fn extract(&self) -> Result<Vec<Task>, TaskError> {
        if self.body.is_empty() {
            return Err(TaskError::EmptyBody {
                raw: self.raw_command.clone(),
            });
        }

        self.body
            .split(',')
            .map(|item| {
                let item = item.trim();
                let invalid = || TaskError::InvalidTarget {
                    raw: self.raw_command.clone(),
                    item: item.to_string(),
                };

                let (address, value) = if self.kind.is_write() {
                    let (address, value) = item.split_once('=').ok_or_else(invalid)?;
                    if value.contains('=') || value.is_empty() {
                        return Err(invalid());
                    }
                    (address, Some(value.to_string()))
                } else {
                    (item, None)
                };

                if address.is_empty() {
                    return Err(invalid());
                }

                Ok(self.derive(self.kind, Some(address.to_string()), value))
            })
            .collect()
    }

    /// Builds the read that confirms a write: same target, no value.
    ///
    /// A bus write is not self-acknowledging, so every write is followed by
    /// a read of the same group.
    pub fn follow_up_read(&self) -> Task {
        self.derive(CommandKind::Read, self.group_address.clone(), None)
    }

    /// Attaches a response, returning the updated task.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    fn derive(&self, kind: CommandKind, group_address: Option<String>, value: Option<String>) -> Task {
        Task {
            id: TaskId::next(),
            created_at: Utc::now(),
            raw_command: self.raw_command.clone(),
            kind,
            body: self.body.clone(),
            group_address,
            value,
            response: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn raw_command(&self) -> &str {
        &self.raw_command
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Un-decomposed command body (everything after the header).
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Target group address text; `None` until decomposed.
    pub fn group_address(&self) -> Option<&str> {
        self.group_address.as_deref()
    }

    /// Undecoded hex value; only present on decomposed write tasks.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Age of the task.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_splits_header_and_body() {
        let task = Task::from_raw("RE 15/0/1,15/0/2").unwrap();
        assert_eq!(task.kind(), CommandKind::Read);
        assert_eq!(task.body(), "15/0/1,15/0/2");
        assert_eq!(task.raw_command(), "RE 15/0/1,15/0/2");
        assert!(task.group_address().is_none());
        assert!(task.value().is_none());
    }

    #[test]
    fn test_from_raw_unknown_header() {
        assert_eq!(
            Task::from_raw("ZZ 1/2/3"),
            Err(TaskError::UnknownHeader {
                header: "ZZ".to_string()
            })
        );
    }

    #[test]
    fn test_extract_send_pairs_in_order() {
        let task = Task::from_raw("SE 1/0/1=v1,1/0/2=v2").unwrap();
        let tasks = task.extract().unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].group_address(), Some("1/0/1"));
        assert_eq!(tasks[0].value(), Some("v1"));
        assert_eq!(tasks[1].group_address(), Some("1/0/2"));
        assert_eq!(tasks[1].value(), Some("v2"));
        assert!(tasks.iter().all(|t| t.kind() == CommandKind::Send));
        assert!(tasks.iter().all(|t| t.raw_command() == "SE 1/0/1=v1,1/0/2=v2"));
    }

    #[test]
    fn test_extract_read_has_no_value() {
        let task = Task::from_raw("WE 15/0/1,15/0/2,15/0/3").unwrap();
        let tasks = task.extract().unwrap();

        let addresses: Vec<_> = tasks.iter().filter_map(|t| t.group_address()).collect();
        assert_eq!(addresses, vec!["15/0/1", "15/0/2", "15/0/3"]);
        assert!(tasks.iter().all(|t| t.value().is_none()));
    }

    #[test]
    fn test_extract_rejects_bad_items() {
        assert!(Task::from_raw("SE 1/0/1").unwrap().extract().is_err());
        assert!(Task::from_raw("SE 1/0/1=").unwrap().extract().is_err());
        assert!(Task::from_raw("RE 1/0/1,,1/0/2").unwrap().extract().is_err());
        assert!(matches!(
            Task::from_raw("RE").unwrap().extract(),
            Err(TaskError::EmptyBody { .. })
        ));
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let task = Task::from_raw("RE 1/0/1,1/0/2").unwrap();
        let tasks = task.extract().unwrap();
        assert!(task.id() < tasks[0].id());
        assert!(tasks[0].id() < tasks[1].id());
    }

    #[test]
    fn test_follow_up_read() {
        let task = Task::from_raw("SE 1/0/1=FF").unwrap();
        let write = task.extract().unwrap().remove(0);
        let read = write.follow_up_read();

        assert_eq!(read.kind(), CommandKind::Read);
        assert_eq!(read.group_address(), Some("1/0/1"));
        assert!(read.value().is_none());
        assert_ne!(read.id(), write.id());
    }

    #[test]
    fn test_bus_ops() {
        assert_eq!(CommandKind::Read.bus_op(), Some(BusOp::Read));
        assert_eq!(CommandKind::Watch.bus_op(), Some(BusOp::Read));
        assert_eq!(CommandKind::Send.bus_op(), Some(BusOp::Write));
        assert_eq!(CommandKind::Unwatch.bus_op(), None);
        assert_eq!(CommandKind::Bye.bus_op(), None);
    }

    #[test]
    fn test_header_roundtrip() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_header(kind.header()), Some(kind));
        }
    }

    #[test]
    fn test_from_header_rejects_unknown() {
        assert_eq!(CommandKind::from_header("ZZ"), None);
        assert_eq!(CommandKind::from_header("re"), None);
        assert_eq!(CommandKind::from_header("RE "), None);
        assert_eq!(CommandKind::from_header(""), None);
    }

    #[test]
    fn test_age_grows_from_creation() {
        let task = Task::from_raw("RE 1/0/1").unwrap();
        let age = task.age();
        assert!(age >= chrono::Duration::zero());
        assert!(age < chrono::Duration::seconds(5));

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(task.age() > age);
    }

    #[test]
    fn test_with_response() {
        let task = Task::from_raw("RE 1/0/1").unwrap().with_response("1/0/1=FF");
        assert_eq!(task.response(), Some("1/0/1=FF"));
    }
}
