//! Command implementations for the ragzip CLI.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use ragzip::parallel::{
    ParallelDecodeOptions, ParallelDecoder, ParallelEncodeOptions, ParallelEncoder,
};
use ragzip::{Error, GzipStream, IndexCacheMode, RagzipReader, RagzipWriter, Result};

const COPY_BUF: usize = 1 << 16;

/// "-" as an output path selects stdout.
fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn check_input_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(Error::InvalidConfig(format!(
            "input file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Decoder inputs must look like gzip files.
fn check_gz_suffix(path: &Path) -> Result<()> {
    let ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("rgz"));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "input file is not .gz or .rgz: {}",
            path.display()
        )))
    }
}

fn check_output_writable(path: &Path, clobber: bool) -> Result<()> {
    if path.exists() && !clobber {
        return Err(Error::InvalidConfig(format!(
            "output file exists, use --clobber to overwrite: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Default encode output: input + ".gz". None means stdout.
fn resolve_encode_output(
    input: Option<&Path>,
    output: Option<&Path>,
) -> Option<PathBuf> {
    match (input, output) {
        (_, Some(out)) if is_stdout(out) => None,
        (_, Some(out)) => Some(out.to_path_buf()),
        (Some(input), None) => {
            let mut name = input.as_os_str().to_os_string();
            name.push(".gz");
            Some(PathBuf::from(name))
        }
        (None, None) => None,
    }
}

/// Default decode output: input minus its final extension. None means
/// stdout.
fn resolve_decode_output(
    input: Option<&Path>,
    output: Option<&Path>,
) -> Option<PathBuf> {
    match (input, output) {
        (_, Some(out)) if is_stdout(out) => None,
        (_, Some(out)) => Some(out.to_path_buf()),
        (Some(input), None) => Some(input.with_extension("")),
        (None, None) => None,
    }
}

pub fn encode(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    page_exponent: u8,
    index_exponent: u8,
    clobber: bool,
) -> Result<()> {
    let out_path = resolve_encode_output(input.as_deref(), output.as_deref());
    if let Some(path) = &input {
        check_input_file(path)?;
    }
    if let Some(path) = &out_path {
        check_output_writable(path, clobber)?;
    }
    info!(
        input = %input.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_else(|| "<stdin>".into()),
        output = %out_path.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_else(|| "<stdout>".into()),
        page_exponent,
        index_exponent,
        "ragzip encoding"
    );

    let mut src: Box<dyn Read> = match &input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };
    let sink: Box<dyn Write> = match &out_path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    let mut writer = RagzipWriter::new(sink, page_exponent, index_exponent)?;
    io::copy(&mut src, &mut writer)?;
    let summary = writer.finish()?;
    info!(
        uncompressed = summary.uncompressed_size,
        compressed = summary.compressed_size,
        pages = summary.pages,
        levels = summary.levels,
        "done"
    );
    Ok(())
}

pub fn decode(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    specs: bool,
    clobber: bool,
) -> Result<()> {
    if let Some(path) = &input {
        check_gz_suffix(path)?;
        check_input_file(path)?;
    }

    if specs {
        let path = input.ok_or_else(|| {
            Error::InvalidConfig("printing specs (-s) requires an input file (-i)".into())
        })?;
        return print_specs(&path);
    }

    let out_path = resolve_decode_output(input.as_deref(), output.as_deref());
    if let Some(path) = &out_path {
        check_output_writable(path, clobber)?;
    }

    let mut src: Box<dyn Read> = match &input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };
    let mut sink: Box<dyn Write> = match &out_path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    let mut gz = GzipStream::open(&mut src, true)?;
    let mut buf = vec![0u8; COPY_BUF];
    let mut total = 0u64;
    loop {
        let n = gz.read(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    info!(uncompressed = total, "done");
    Ok(())
}

/// Prints the footer specs and extension list of a ragzip file.
fn print_specs(path: &Path) -> Result<()> {
    let reader = RagzipReader::with_cache(File::open(path)?, IndexCacheMode::Loaded)?;
    let tree = reader.tree_spec();
    println!(
        "version {}.{} ({:#010x})",
        reader.version() >> 16,
        reader.version() & 0xffff,
        reader.version()
    );
    println!("levels   = {}", tree.levels);
    println!("idx sz   = 2^{} ({})", tree.index_exponent, tree.index_size());
    println!("pg sz    = 2^{} ({})", tree.page_exponent, tree.page_size());
    println!(
        "uncompressed size: {} ({:#x})",
        reader.len(),
        reader.len()
    );

    if reader.len() > 0 {
        let mut items = ((reader.len() - 1) >> tree.page_exponent) + 1;
        println!("derived number of pages: {items}");
        for level in 1..=tree.levels {
            items = ((items - 1) >> tree.index_exponent) + 1;
            println!("derived number of level {level} indexes: {items}");
        }
    }

    for ext in reader.extensions() {
        let preview: String = ext
            .payload()
            .iter()
            .take(50)
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        println!(
            "extension[{} id={} flags={:#04x} {} bytes: {preview}{}]",
            if ext.is_spec() { "SPEC" } else { "user" },
            ext.id(),
            ext.flags(),
            ext.payload().len(),
            if ext.payload().len() > 50 { "..." } else { "" },
        );
    }
    if reader.extensions_truncated() {
        println!("further extensions were not loaded (limit of 50 reached)");
    }
    Ok(())
}

pub fn pencode(
    input: PathBuf,
    output: Option<PathBuf>,
    page_exponent: u8,
    index_exponent: u8,
    threads: usize,
    clobber: bool,
) -> Result<()> {
    check_input_file(&input)?;
    let out_path = resolve_encode_output(Some(&input), output.as_deref()).ok_or_else(|| {
        Error::InvalidConfig("parallel encoding cannot write to stdout".into())
    })?;
    check_output_writable(&out_path, clobber)?;

    let summary = ParallelEncoder::new(&input, &out_path, page_exponent, index_exponent)?
        .with_options(ParallelEncodeOptions::new().threads(threads))
        .run()?;
    info!(
        uncompressed = summary.uncompressed_size,
        compressed = summary.compressed_size,
        pages = summary.pages,
        levels = summary.levels,
        "done"
    );
    Ok(())
}

pub fn pdecode(
    input: PathBuf,
    output: Option<PathBuf>,
    threads: usize,
    clobber: bool,
) -> Result<()> {
    check_gz_suffix(&input)?;
    check_input_file(&input)?;
    let out_path = resolve_decode_output(Some(&input), output.as_deref()).ok_or_else(|| {
        Error::InvalidConfig("parallel decoding cannot write to stdout".into())
    })?;
    check_output_writable(&out_path, clobber)?;

    let summary = ParallelDecoder::new(&input, &out_path)
        .with_options(ParallelDecodeOptions::new().threads(threads))
        .run()?;
    info!(
        uncompressed = summary.uncompressed_size,
        pages = summary.pages,
        "done"
    );
    Ok(())
}
