//! ffmpeg argument construction for each job kind.
//!
//! The result is an opaque argument vector for [`crate::ToolCommand`]: the
//! thread flag, one `-i` per input, the caller's params or the kind's default
//! filter chain, then the output path.

use std::path::{Path, PathBuf};

use tf_core::{Error, JobKind, Result};

/// Build the ffmpeg arguments (without the program itself).
///
/// `params`, when present, is split on whitespace and may reference
/// `{input}` (first input), `{inputN}` (N-th input, zero-based) and
/// `{output}`. When it references `{output}` the output path is not appended
/// again.
pub fn build_args(
    kind: JobKind,
    inputs: &[PathBuf],
    output: &Path,
    params: Option<&str>,
    threads: &str,
) -> Result<Vec<String>> {
    if inputs.is_empty() {
        return Err(Error::Validation("at least one input is required".into()));
    }

    let mut args = Vec::new();

    if threads != "auto" {
        let flag = match kind {
            JobKind::Normalize => "-threads",
            _ => "-threads:v",
        };
        args.push(flag.to_string());
        args.push(threads.to_string());
    }

    for input in inputs {
        args.push("-i".into());
        args.push(input.to_string_lossy().to_string());
    }

    let params = params.map(str::trim).filter(|p| !p.is_empty());
    let output_str = output.to_string_lossy().to_string();
    let mut output_placed = false;

    match params {
        Some(params) => {
            for token in params.split_whitespace() {
                if token.contains("{output}") {
                    output_placed = true;
                }
                args.push(substitute(token, inputs, &output_str)?);
            }
        }
        None => args.extend(default_chain(kind, inputs)?),
    }

    if !output_placed {
        args.push(output_str);
    }

    Ok(args)
}

/// Check that a job can be turned into a command line without running it.
pub fn validate(kind: JobKind, inputs: &[PathBuf], params: Option<&str>) -> Result<()> {
    build_args(kind, inputs, Path::new("output"), params, "auto").map(|_| ())
}

fn default_chain(kind: JobKind, inputs: &[PathBuf]) -> Result<Vec<String>> {
    let chain = match kind {
        JobKind::Normalize => vec!["-filter:a".into(), "loudnorm".into(), "-c:v".into(), "copy".into()],
        JobKind::Captionize => {
            let subtitles = inputs.get(1).ok_or_else(|| {
                Error::Validation("captionize needs a media input and a subtitle input".into())
            })?;
            vec![
                "-vf".into(),
                format!("subtitles={}", subtitles.to_string_lossy()),
                "-c:a".into(),
                "copy".into(),
            ]
        }
        JobKind::Custom => {
            return Err(Error::Validation("custom jobs require params".into()));
        }
    };
    Ok(chain)
}

/// Replace `{input}`, `{inputN}` and `{output}` inside one token.
fn substitute(token: &str, inputs: &[PathBuf], output: &str) -> Result<String> {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find('}') else {
            out.push_str(after);
            return Ok(out);
        };
        let name = &after[1..end];
        match placeholder(name, inputs, output)? {
            Some(value) => out.push_str(&value),
            // Not ours (e.g. an ffmpeg expression); keep it verbatim.
            None => out.push_str(&after[..=end]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn placeholder(name: &str, inputs: &[PathBuf], output: &str) -> Result<Option<String>> {
    if name == "output" {
        return Ok(Some(output.to_string()));
    }
    let Some(index) = name.strip_prefix("input") else {
        return Ok(None);
    };
    let index = if index.is_empty() {
        0
    } else {
        match index.parse::<usize>() {
            Ok(i) => i,
            Err(_) => return Ok(None),
        }
    };
    inputs
        .get(index)
        .map(|p| Some(p.to_string_lossy().to_string()))
        .ok_or_else(|| {
            Error::Validation(format!(
                "params reference {{{name}}} but only {} input(s) were given",
                inputs.len()
            ))
        })
}
