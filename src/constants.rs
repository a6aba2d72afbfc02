/// Per-account storage quota in bytes (200MB).
pub const STORAGE_QUOTA_BYTES: i64 = 200 * 1024 * 1024;

/// Largest single object accepted by the books bucket (200MB).
pub const MAX_OBJECT_BYTES: i64 = 200 * 1024 * 1024;

/// Request bodies may carry the file plus a few small form fields.
pub const MAX_UPLOAD_BODY_BYTES: usize = MAX_OBJECT_BYTES as usize + 1024 * 1024;

/// Bucket holding every book payload.
pub const BOOKS_BUCKET: &str = "books";

/// Longest accepted book title, in characters.
pub const MAX_TITLE_CHARS: usize = 500;

/// Longest accepted author or display name, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Minimum password length accepted at signup.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Minimum JWT signing secret length in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Issuer claim stamped on every token.
pub const TOKEN_ISSUER: &str = "bookshelf";

/// Default access token lifetime (1 hour).
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3_600;

/// Default refresh token lifetime (30 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 2_592_000;
