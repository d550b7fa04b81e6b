/// Errors raised by document-level operations.
///
/// Not-found conditions are always reported as errors, never as empty
/// results, so every CRUD entry point has the same failure shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// No thread (active or soft-deleted) with this id
    ThreadNotFound(String),
    /// Thread exists but has no active comment with this id
    CommentNotFound { thread_id: String, comment_id: String },
    /// A stored record is missing required fields
    MalformedRecord(String),
    /// The CRDT engine refused an update
    UpdateRejected(String),
    /// An observer could not be registered on the document
    ObserverUnavailable(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::ThreadNotFound(id) => write!(f, "Thread not found: {id}"),
            DocumentError::CommentNotFound {
                thread_id,
                comment_id,
            } => write!(f, "Comment {comment_id} not found in thread {thread_id}"),
            DocumentError::MalformedRecord(e) => write!(f, "Malformed record: {e}"),
            DocumentError::UpdateRejected(e) => write!(f, "Update rejected: {e}"),
            DocumentError::ObserverUnavailable(e) => write!(f, "Observer unavailable: {e}"),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::UpdateRejected(e.to_string())
    }
}
