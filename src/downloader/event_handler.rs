/// Handler to receive notifications for events during the download process.
///
/// All methods are optional. Methods can be invoked from multiple
/// threads when blobs are downloaded in parallel.
#[expect(unused_variables)]
pub trait EventHandler: Send + Sync + 'static {
    /// HTTP request to the registry.
    fn registry_request(&self, url: &str) {}

    /// Start to download the blobs of an image.
    ///
    /// `blobs` is the number of files to download, and `bytes` is the
    /// size declared in the manifest.
    fn download_start(&self, blobs: usize, bytes: u64) {}

    /// A file was written to the disk.
    fn blob_finished(&self, url: &str, bytes: u64) {}

    /// The artifact is ready for the extractor.
    fn finished(&self) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}
