//! Grep-style output for search results.

use crate::index::build::Corpus;
use crate::query::searcher::{MatchContext, MatchResult};
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print results in `path:line:content` form with highlighted matches
/// and context lines.
pub fn print_matches(corpus: &Corpus, results: &[MatchResult], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);

    let mut first = true;
    for m in results {
        let line = String::from_utf8_lossy(corpus.span_bytes(&m.line));
        for ctx in &m.context {
            for path in &ctx.paths {
                if !first {
                    writeln!(stdout, "--")?;
                }
                first = false;
                print_context_block(&mut stdout, corpus, &path.path, ctx, true)?;
                print_match_line(
                    &mut stdout,
                    &path.path,
                    ctx.line_number,
                    &line,
                    m.match_left,
                    m.match_right,
                )?;
                print_context_block(&mut stdout, corpus, &path.path, ctx, false)?;
            }
        }
    }

    Ok(())
}

fn print_context_block(
    stdout: &mut StandardStream,
    corpus: &Corpus,
    path: &str,
    ctx: &MatchContext,
    before: bool,
) -> io::Result<()> {
    // Context spans are stored nearest-first; the before block prints
    // farthest-first.
    let spans = if before {
        &ctx.context_before
    } else {
        &ctx.context_after
    };
    let mut numbered: Vec<(u32, &crate::index::types::Span)> = spans
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let lno = if before {
                ctx.line_number - 1 - i as u32
            } else {
                ctx.line_number + 1 + i as u32
            };
            (lno, s)
        })
        .collect();
    if before {
        numbered.reverse();
    }

    for (lno, span) in numbered {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(stdout, "{}", path)?;
        stdout.reset()?;
        write!(stdout, "-")?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "{}", lno)?;
        stdout.reset()?;
        writeln!(stdout, "-{}", String::from_utf8_lossy(corpus.span_bytes(span)))?;
    }
    Ok(())
}

fn print_match_line(
    stdout: &mut StandardStream,
    path: &str,
    lno: u32,
    line: &str,
    match_left: u32,
    match_right: u32,
) -> io::Result<()> {
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
    write!(stdout, "{}", path)?;
    stdout.reset()?;
    write!(stdout, ":")?;
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
    write!(stdout, "{}", lno)?;
    stdout.reset()?;
    write!(stdout, ":")?;

    // Offsets are in scalars; map them back to byte positions to slice.
    let start = byte_offset(line, match_left);
    let end = byte_offset(line, match_right);

    write!(stdout, "{}", &line[..start])?;
    if end > start {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(stdout, "{}", &line[start..end])?;
        stdout.reset()?;
    }
    writeln!(stdout, "{}", &line[end..])?;
    Ok(())
}

fn byte_offset(line: &str, chars: u32) -> usize {
    line.char_indices()
        .nth(chars as usize)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}
