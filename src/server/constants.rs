/// Allowance for multipart boundaries and part headers on top of the file itself.
///
/// Widens the declared-length ceiling: a request whose `Content-Length` exceeds
/// the upload limit by less than this passes pre-flight and is caught while
/// streaming instead.
pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
/// Mount point of the static upload directory.
pub const UPLOADS_MOUNT: &str = "/uploads";
