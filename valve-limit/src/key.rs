/// A key prefix that keeps independently configured limiters and guards apart.
///
/// Trailing separators are trimmed, so `"lock:uid:"` and `"lock:uid"` name the same
/// namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_end_matches(':').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The store key for partition `id`: `<prefix>:<id>`, or `None` for an empty id.
    pub fn key(&self, id: &str) -> Option<String> {
        (!id.is_empty()).then(|| format!("{}:{id}", self.prefix))
    }
}

/// Derives the partition key of a request.
///
/// `None` means no identity is available for this stage; the stage is then
/// skipped, and a key is never fabricated.
pub trait KeyResolver<R>: Send + Sync {
    fn resolve(&self, request: &R) -> Option<String>;
}

impl<R, F> KeyResolver<R> for F
where
    F: Fn(&R) -> Option<String> + Send + Sync,
{
    fn resolve(&self, request: &R) -> Option<String> {
        self(request).filter(|key| !key.is_empty())
    }
}
