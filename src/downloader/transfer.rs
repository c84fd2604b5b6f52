use std::{
    cmp::min,
    collections::VecDeque,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    thread,
};

use crate::{
    digest::Digest,
    fs::{partial_path, Directory},
    http::Client,
    EventHandler,
};

use super::{try_io, FetchError};

/// Size of the buffer to copy the response body to the file.
const CHUNK_SIZE: usize = 256 * 1024;

/// A file to download.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BlobDescriptor {
    pub digest: Digest,
    pub url: String,

    /// Path of the file, relative to the download directory.
    pub destination: PathBuf,
}

/// Download `url` to `destination`, relative to `target`.
///
/// If `expected` is present, the response body must match its digest.
pub(crate) fn fetch(
    http_client: &Client,
    url: &str,
    target: &Directory,
    destination: &Path,
    expected: Option<&Digest>,
) -> Result<u64, FetchError> {
    fetch_with_flag(
        http_client,
        url,
        target,
        destination,
        expected,
        &AtomicBool::new(true),
    )
}

/// Download all blobs in `plan`, using up to `max_concurrency` threads.
///
/// When a download fails, the other threads stop at their next
/// chunk, and the first error is returned.
pub(crate) fn fetch_all(
    http_client: &Client,
    plan: &[BlobDescriptor],
    target: &Directory,
    max_concurrency: usize,
    event_handler: &dyn EventHandler,
) -> Result<(), FetchError> {
    let is_alive = AtomicBool::new(true);
    let failure: Mutex<Option<FetchError>> = Mutex::new(None);

    let pending: VecDeque<_> = plan.iter().collect();
    let pending = Mutex::new(pending);

    thread::scope(|scope| {
        for _ in 0..min(max_concurrency.max(1), plan.len()) {
            scope.spawn(|| {
                while let Ok(Some(blob)) = pending.lock().map(|mut q| q.pop_front()) {
                    if !is_alive.load(Ordering::Relaxed) {
                        break;
                    }

                    let result = fetch_with_flag(
                        http_client,
                        &blob.url,
                        target,
                        &blob.destination,
                        Some(&blob.digest),
                        &is_alive,
                    );

                    match result {
                        Ok(bytes) => event_handler.blob_finished(&blob.url, bytes),

                        Err(err) => {
                            is_alive.store(false, Ordering::Relaxed);
                            record_failure(&failure, err);
                            break;
                        }
                    }
                }
            });
        }
    });

    match failure.into_inner() {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(err),
        Err(poisoned) => poisoned.into_inner().map_or(Ok(()), Err),
    }
}

/// Keep the first error that is not caused by the interruption of
/// another download.
fn record_failure(failure: &Mutex<Option<FetchError>>, err: FetchError) {
    if let Ok(mut slot) = failure.lock() {
        match &*slot {
            None | Some(FetchError::Interrupted) => *slot = Some(err),
            Some(_) => (),
        }
    }
}

fn fetch_with_flag(
    http_client: &Client,
    url: &str,
    target: &Directory,
    destination: &Path,
    expected: Option<&Digest>,
    is_alive: &AtomicBool,
) -> Result<u64, FetchError> {
    tracing::info!(%url, "going to download");

    let response = http_client.get(url, None)?;

    let mut input: Box<dyn Read> = {
        let reader = response.into_reader();
        match expected {
            Some(digest) => Box::new(digest.wrap_reader(reader)),
            None => Box::new(reader),
        }
    };

    // Write to a temporary file, and rename it when the download is
    // completed. Readers never see a partial file with the final name.
    let partial = partial_path(destination);
    let full_path = target.path().join(destination);

    match copy_body(&mut input, target, &partial, &full_path, is_alive) {
        Ok(bytes) => {
            try_io!(&full_path, target.rename(&partial, destination));
            Ok(bytes)
        }

        Err(err) => {
            let _ = target.remove_file(&partial);
            Err(err)
        }
    }
}

fn copy_body(
    input: &mut dyn Read,
    target: &Directory,
    partial: &Path,
    full_path: &Path,
    is_alive: &AtomicBool,
) -> Result<u64, FetchError> {
    let mut file = try_io!(full_path, target.create(partial));
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0;

    loop {
        if !is_alive.load(Ordering::Relaxed) {
            return Err(FetchError::Interrupted);
        }

        let n = try_io!(full_path, input.read(&mut buffer));

        if n == 0 {
            try_io!(full_path, file.sync_all());
            return Ok(written);
        }

        try_io!(full_path, file.write_all(&buffer[..n]));
        written += n as u64;
    }
}
