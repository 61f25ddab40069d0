//! File splitter
//!
//! Cuts a file into parts no larger than a byte limit and packages them into
//! one zip archive:
//! - Text: contiguous byte ranges covering the file exactly once, in order
//! - PDF: runs of whole pages. A run grows while its serialized size stays
//!   within the limit. A single page larger than the limit becomes its own
//!   oversized part rather than an error.
//!
//! Parts are standalone files of the source format named
//! `<index>_<stem>.<ext>` (1-based, zero-padded), written under
//! `<output_dir>/<task_id>_parts/`; the archive is
//! `<output_dir>/<task_id>_split.zip` with entries in part order.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ensure_exists, suffix_of, Checkpoint, ProcessingError, Result};
use crate::upload::original_file_name;

/// Splittable input, tagged by format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitSource {
    /// Byte-oriented plain text
    Text(PathBuf),
    /// Paginated PDF
    Pdf(PathBuf),
}

impl SplitSource {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_exists(path)?;
        match suffix_of(path).as_str() {
            ".txt" => Ok(SplitSource::Text(path.to_path_buf())),
            ".pdf" => Ok(SplitSource::Pdf(path.to_path_buf())),
            other => Err(ProcessingError::UnsupportedFileType(other.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SplitSource::Text(p) | SplitSource::Pdf(p) => p,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            SplitSource::Text(_) => "txt",
            SplitSource::Pdf(_) => "pdf",
        }
    }
}

/// Produced archive and the part files it contains, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub archive_path: PathBuf,
    pub part_paths: Vec<PathBuf>,
}

/// Archive file name for a split task
pub fn archive_name(task_id: &str) -> String {
    format!("{}_split.zip", task_id)
}

/// Byte ranges of at most `limit` bytes covering `0..size` in order
pub fn plan_byte_ranges(size: u64, limit: u64) -> Vec<Range<u64>> {
    if limit == 0 {
        return Vec::new();
    }
    (0..size)
        .step_by(limit as usize)
        .map(|start| start..(start + limit).min(size))
        .collect()
}

/// Split `path` into parts of at most `limit` bytes and archive them.
///
/// On any error, including cancellation, the parts directory and a
/// half-written archive are removed.
pub fn split_file_and_build_zip(
    path: &Path,
    output_dir: &Path,
    task_id: &str,
    limit: u64,
    checkpoint: &dyn Checkpoint,
) -> Result<SplitOutput> {
    if limit == 0 {
        return Err(ProcessingError::InvalidLimit(limit));
    }

    let source = SplitSource::open(path)?;
    if std::fs::metadata(path)?.len() == 0 {
        return Err(ProcessingError::EmptyInput(path.display().to_string()));
    }

    let parts_dir = output_dir.join(format!("{}_parts", task_id));
    let archive_path = output_dir.join(archive_name(task_id));

    let result = write_parts_and_archive(&source, &parts_dir, &archive_path, limit, checkpoint);
    if result.is_err() {
        let _ = std::fs::remove_dir_all(&parts_dir);
        let _ = std::fs::remove_file(&archive_path);
    }
    let part_paths = result?;

    tracing::debug!(
        task_id = %task_id,
        parts = part_paths.len(),
        archive = %archive_path.display(),
        "Split archive written"
    );

    Ok(SplitOutput {
        archive_path,
        part_paths,
    })
}

fn write_parts_and_archive(
    source: &SplitSource,
    parts_dir: &Path,
    archive_path: &Path,
    limit: u64,
    checkpoint: &dyn Checkpoint,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(parts_dir)?;

    let file_name = source
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = Path::new(original_file_name(&file_name))
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "part".to_string());
    let namer = PartNamer {
        dir: parts_dir.to_path_buf(),
        stem,
        extension: source.extension(),
    };

    let part_paths = match source {
        SplitSource::Text(p) => split_text(p, limit, &namer, checkpoint)?,
        SplitSource::Pdf(p) => split_pdf(p, limit, &namer, checkpoint)?,
    };

    build_archive(archive_path, &part_paths)?;
    Ok(part_paths)
}

struct PartNamer {
    dir: PathBuf,
    stem: String,
    extension: &'static str,
}

impl PartNamer {
    fn path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{:04}_{}.{}", index + 1, self.stem, self.extension))
    }
}

// ============================================================================
// Text
// ============================================================================

fn split_text(path: &Path, limit: u64, namer: &PartNamer, checkpoint: &dyn Checkpoint) -> Result<Vec<PathBuf>> {
    let mut source = File::open(path)?;
    let size = source.metadata()?.len();
    if size == 0 {
        return Err(ProcessingError::EmptyInput(path.display().to_string()));
    }

    let ranges = plan_byte_ranges(size, limit);
    let total = ranges.len() as u64;
    let mut parts = Vec::with_capacity(ranges.len());

    for (index, range) in ranges.into_iter().enumerate() {
        let expected = range.end - range.start;
        let part_path = namer.path(index);
        let mut part = File::create(&part_path)?;

        let copied = io::copy(&mut (&mut source).take(expected), &mut part)?;
        if copied != expected {
            return Err(ProcessingError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source shrank while splitting at byte {}", range.start + copied),
            )));
        }

        parts.push(part_path);
        checkpoint.checkpoint(index as u64 + 1, total, "Writing part")?;
    }

    Ok(parts)
}

// ============================================================================
// PDF
// ============================================================================

fn split_pdf(path: &Path, limit: u64, namer: &PartNamer, checkpoint: &dyn Checkpoint) -> Result<Vec<PathBuf>> {
    let document = Document::load(path).map_err(pdf_error)?;
    let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(ProcessingError::EmptyInput(path.display().to_string()));
    }

    let runs = plan_page_runs(
        page_ids.len(),
        limit,
        |pages| render_pages(&document, &page_ids[pages]),
        checkpoint,
    )?;

    let mut parts = Vec::with_capacity(runs.len());
    for (index, bytes) in runs.into_iter().enumerate() {
        let part_path = namer.path(index);
        File::create(&part_path)?.write_all(&bytes)?;
        parts.push(part_path);
    }

    Ok(parts)
}

/// Group consecutive pages into the longest runs whose rendered size fits.
///
/// Run length is found by doubling until a render no longer fits, then
/// bisecting, so a run of `n` pages costs O(log n) renders. Rendered size is
/// taken to grow with the page count. The first page of a run is always
/// taken even when it alone exceeds `limit`.
fn plan_page_runs<F>(
    page_count: usize,
    limit: u64,
    mut render: F,
    checkpoint: &dyn Checkpoint,
) -> Result<Vec<Vec<u8>>>
where
    F: FnMut(Range<usize>) -> Result<Vec<u8>>,
{
    let total = page_count as u64;
    let mut runs = Vec::new();
    let mut start = 0;

    while start < page_count {
        let remaining = page_count - start;
        let mut fit_len = 1;
        let mut fit_bytes = render(start..start + 1)?;

        if fit_bytes.len() as u64 > limit {
            tracing::debug!(
                page = start + 1,
                size = fit_bytes.len(),
                limit = limit,
                "Single page exceeds the part limit"
            );
        } else {
            // Smallest length known not to fit
            let mut overflow_len = None;
            while fit_len < remaining {
                let len = (fit_len * 2).min(remaining);
                let bytes = render(start..start + len)?;
                if bytes.len() as u64 > limit {
                    overflow_len = Some(len);
                    break;
                }
                fit_len = len;
                fit_bytes = bytes;
            }

            if let Some(mut high) = overflow_len {
                while high - fit_len > 1 {
                    let mid = fit_len + (high - fit_len) / 2;
                    let bytes = render(start..start + mid)?;
                    if bytes.len() as u64 > limit {
                        high = mid;
                    } else {
                        fit_len = mid;
                        fit_bytes = bytes;
                    }
                }
            }
        }

        for page in start..start + fit_len {
            checkpoint.checkpoint(page as u64 + 1, total, "Splitting page")?;
        }
        runs.push(fit_bytes);
        start += fit_len;
    }

    Ok(runs)
}

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITED_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Serialize a standalone document holding only `pages`.
///
/// Only objects reachable from the kept pages are copied, so the cost follows
/// the size of the run rather than the size of the source.
fn render_pages(document: &Document, pages: &[ObjectId]) -> Result<Vec<u8>> {
    let mut part = Document::with_version(document.version.clone());
    part.max_id = document.max_id;
    let pages_id = part.new_object_id();

    let mut copied: BTreeSet<ObjectId> = pages.iter().copied().collect();
    let mut pending = Vec::new();
    let mut kids = Vec::with_capacity(pages.len());

    for &page_id in pages {
        let mut page = document.get_dictionary(page_id).map_err(pdf_error)?.clone();
        for key in INHERITED_PAGE_KEYS {
            if !page.has(key) {
                if let Some(value) = inherited_attribute(document, &page, key) {
                    page.set(key, value);
                }
            }
        }
        page.set("Parent", pages_id);

        push_dictionary_references(&page, &mut pending);
        part.objects.insert(page_id, Object::Dictionary(page));
        kids.push(Object::Reference(page_id));
    }

    while let Some(id) = pending.pop() {
        if !copied.insert(id) {
            continue;
        }
        let Ok(object) = document.get_object(id) else {
            continue;
        };
        // Other pages stay behind; references to them become null
        if is_page_node(object) {
            continue;
        }
        push_references(object, &mut pending);
        part.objects.insert(id, object.clone());
    }

    part.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );
    let catalog_id = part.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    part.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    part.save_to(&mut bytes).map_err(pdf_error)?;
    Ok(bytes)
}

fn inherited_attribute(document: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk, page trees can be malformed
    for _ in 0..32 {
        let node = document.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn is_page_node(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        _ => return false,
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Page") | Ok(b"Pages")
    )
}

fn push_references(object: &Object, pending: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => pending.push(*id),
        Object::Array(items) => items.iter().for_each(|item| push_references(item, pending)),
        Object::Dictionary(dict) => push_dictionary_references(dict, pending),
        Object::Stream(stream) => push_dictionary_references(&stream.dict, pending),
        _ => {}
    }
}

/// `Parent` links lead back into the source page tree and are not followed
fn push_dictionary_references(dict: &Dictionary, pending: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            push_references(value, pending);
        }
    }
}

fn pdf_error(err: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::Pdf(err.to_string())
}

// ============================================================================
// Archive
// ============================================================================

fn build_archive(archive_path: &Path, parts: &[PathBuf]) -> Result<()> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for part in parts {
        let name = part
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        let mut reader = File::open(part)?;
        io::copy(&mut reader, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}
