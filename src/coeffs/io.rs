/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Checkpoint field files.
//!
//! One stream holds a sequence of blocks, one block per checkpoint.  Each
//! block is a `#! FIELDS` line naming the data columns, `#! SET` lines for
//! the named constant fields, the data lines themselves, and a terminator
//! (a comment separator followed by two blank lines, so downstream plotting
//! tools can split a stream on blank lines):
//!
//! ```text
//! #! FIELDS idx_x idx_y coeff aux_coeff index
//! #! SET label coeffs
//! #! SET type linear_basis_coeffs
//! #! SET ncoeffs_total 12
//! #! SET x_ncoeffs 3
//! #! SET y_ncoeffs 4
//! #! SET iteration 100
//!        0        0    1.0000000000000000e0 ...
//! #!-------------------
//! ```
//!
//! The constant fields are authoritative on read; the reader recomputes
//! every record's flat index from its per-dimension indices and rejects
//! the file on any disagreement.

use crate::{CoeffsMatrix, CoeffsVector, ConsistencyError, FailResult, ShortReadError};

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const SEPARATOR: &str = "#!-------------------";
const INDEX_PREFIX: &str = "idx_";
const VALUE_FIELD: &str = "coeff";
const AUX_VALUE_FIELD: &str = "aux_coeff";

/// What one block-read produced.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// Number of coefficient records in the block (may be less than the
    /// container's total when partial data was allowed).
    pub n_read: usize,
    /// The block's `iteration` constant field, if present.
    pub iteration: Option<u64>,
}

/// Wrapper around `File::create` that adds context.
pub fn create(path: impl AsRef<Path>) -> FailResult<File> {
    let path = path.as_ref();
    File::create(path)
        .map_err(|e| format_err!("could not create file '{}': {}", path.display(), e))
}

/// Wrapper around `File::open` that adds context and makes a `BufReader`.
pub fn open_text(path: impl AsRef<Path>) -> FailResult<BufReader<File>> {
    let path = path.as_ref();
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| format_err!("could not open file '{}': {}", path.display(), e))
}

// ----------------------------------------------------------------
// writing

fn write_fields_line(w: &mut dyn Write, fields: &[String]) -> FailResult<()> {
    write!(w, "#! FIELDS")?;
    for field in fields {
        write!(w, " {}", field)?;
    }
    writeln!(w)?;
    Ok(())
}

fn write_constant(w: &mut dyn Write, name: &str, value: impl ::std::fmt::Display) -> FailResult<()> {
    writeln!(w, "#! SET {} {}", name, value)?;
    Ok(())
}

fn write_terminator(w: &mut dyn Write) -> FailResult<()> {
    writeln!(w, "{}", SEPARATOR)?;
    writeln!(w)?;
    writeln!(w)?;
    Ok(())
}

fn write_common_header(
    w: &mut dyn Write,
    space: &crate::CoeffsSpace,
    label: &str,
    kind: &str,
    counter: u64,
) -> FailResult<()> {
    write_constant(w, "label", label)?;
    write_constant(w, "type", kind)?;
    write_constant(w, "ncoeffs_total", space.total())?;
    if let Some(descriptors) = space.basis_descriptors() {
        for (dim_label, descriptor) in izip!(space.labels(), descriptors) {
            write_constant(w, &format!("{}_basis", dim_label), format!("{{{}}}", descriptor))?;
        }
    }
    for (dim_label, extent) in izip!(space.labels(), space.shape()) {
        write_constant(w, &format!("{}_ncoeffs", dim_label), extent)?;
    }
    write_constant(w, "iteration", counter)?;
    Ok(())
}

pub(crate) fn write_vector(
    w: &mut dyn Write,
    v: &CoeffsVector,
    with_descriptions: bool,
) -> FailResult<()> {
    let space = v.space();

    let mut fields: Vec<String> = space.labels().iter()
        .map(|l| format!("{}{}", INDEX_PREFIX, l))
        .collect();
    fields.push(VALUE_FIELD.to_string());
    if v.has_aux() {
        fields.push(AUX_VALUE_FIELD.to_string());
    }
    fields.push("index".to_string());
    if with_descriptions {
        fields.push("description".to_string());
    }

    write_fields_line(w, &fields)?;
    write_common_header(w, space, v.label(), v.kind(), v.counter())?;

    for i in 0..space.total() {
        for idx in space.indices_of(i) {
            write!(w, " {:>8}", idx)?;
        }
        write!(w, " {:>30.16e}", v.value(i))?;
        if let Some(aux) = v.aux() {
            write!(w, " {:>30.16e}", aux[i])?;
        }
        write!(w, " {:>8}", i)?;
        if with_descriptions {
            write!(w, "  {}", space.describe(i))?;
        }
        writeln!(w)?;
    }
    write_terminator(w)?;
    Ok(())
}

pub(crate) fn write_matrix(w: &mut dyn Write, m: &CoeffsMatrix) -> FailResult<()> {
    let space = m.space();

    let fields: Vec<String> = if m.is_diagonal() {
        let mut fields: Vec<String> = space.labels().iter()
            .map(|l| format!("{}{}", INDEX_PREFIX, l))
            .collect();
        fields.push(VALUE_FIELD.to_string());
        fields.push("index".to_string());
        fields
    } else {
        vec!["idx_row".to_string(), "idx_column".to_string(), VALUE_FIELD.to_string()]
    };

    write_fields_line(w, &fields)?;
    write_common_header(w, space, m.label(), "coeffs_matrix", m.counter())?;
    write_constant(w, "diagonal_matrix", m.is_diagonal())?;

    if m.is_diagonal() {
        for i in 0..space.total() {
            for idx in space.indices_of(i) {
                write!(w, " {:>8}", idx)?;
            }
            writeln!(w, " {:>30.16e} {:>8}", m.value(i, i), i)?;
        }
    } else {
        // the entire grid, not just the packed triangle
        for row in 0..m.rows() {
            for col in 0..m.rows() {
                writeln!(w, " {:>8} {:>8} {:>30.16e}", row, col, m.value(row, col))?;
            }
        }
    }
    write_terminator(w)?;
    Ok(())
}

// ----------------------------------------------------------------
// reading

struct Block {
    fields: Vec<String>,
    constants: Vec<(String, String)>,
    rows: Vec<Vec<String>>,
}

impl Block {
    fn constant(&self, name: &str) -> Option<&str> {
        self.constants.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| &v[..])
    }

    fn required_constant(&self, name: &str) -> FailResult<&str> {
        self.constant(name).ok_or_else(|| {
            ConsistencyError {
                detail: format!("required header field '{}' is absent", name),
            }.into()
        })
    }

    fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn required_field_position(&self, name: &str) -> FailResult<usize> {
        self.field_position(name).ok_or_else(|| {
            ConsistencyError {
                detail: format!("no '{}' column among the declared fields", name),
            }.into()
        })
    }
}

/// Read one block off the stream, or `None` at end of input.
fn parse_block(r: &mut dyn BufRead) -> FailResult<Option<Block>> {
    let mut fields: Option<Vec<String>> = None;
    let mut constants = vec![];
    let mut rows = vec![];
    let mut line = String::new();

    loop {
        line.clear();
        if r.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("#!-") {
            break; // block terminator
        }
        if let Some(rest) = strip_directive(trimmed, "#! FIELDS") {
            fields = Some(rest.split_whitespace().map(|s| s.to_string()).collect());
        } else if let Some(rest) = strip_directive(trimmed, "#! SET") {
            let mut it = rest.splitn(2, char::is_whitespace);
            let name = it.next().unwrap_or("").to_string();
            let value = it.next().unwrap_or("").trim().to_string();
            constants.push((name, value));
        } else if trimmed.starts_with('#') {
            continue; // stray comment
        } else {
            rows.push(trimmed.split_whitespace().map(|s| s.to_string()).collect());
        }
    }

    match fields {
        Some(fields) => Ok(Some(Block { fields, constants, rows })),
        None => {
            if constants.is_empty() && rows.is_empty() {
                Ok(None)
            } else {
                Err(ConsistencyError {
                    detail: "block has no '#! FIELDS' header line".to_string(),
                }.into())
            }
        },
    }
}

fn strip_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    if line.starts_with(directive) {
        Some(line[directive.len()..].trim())
    } else {
        None
    }
}

fn parse_usize(token: &str, what: &str) -> FailResult<usize> {
    token.parse().map_err(|_| {
        ConsistencyError { detail: format!("bad {} value '{}'", what, token) }.into()
    })
}

fn parse_f64(token: &str, what: &str) -> FailResult<f64> {
    token.parse().map_err(|_| {
        ConsistencyError { detail: format!("bad {} value '{}'", what, token) }.into()
    })
}

pub(crate) fn read_vector(
    r: &mut dyn BufRead,
    v: &mut CoeffsVector,
    allow_partial: bool,
) -> FailResult<ReadOutcome> {
    let space = v.space().clone();

    let block = match parse_block(r)? {
        Some(block) => block,
        None => bail!(ConsistencyError {
            detail: "no checkpoint block found in input".to_string(),
        }),
    };

    // The declared dimension labels must match the configured ones, in order.
    let declared: Vec<&str> = block.fields.iter()
        .filter(|f| f.starts_with(INDEX_PREFIX))
        .map(|f| &f[INDEX_PREFIX.len()..])
        .collect();
    let configured: Vec<&str> = space.labels().iter().map(|l| &l[..]).collect();
    if declared != configured {
        bail!(ConsistencyError {
            detail: format!(
                "declared dimension labels {:?} do not match the configured {:?}",
                declared, configured,
            ),
        });
    }

    let idx_positions: Vec<usize> = space.labels().iter()
        .map(|l| block.required_field_position(&format!("{}{}", INDEX_PREFIX, l)))
        .collect::<FailResult<_>>()?;
    let value_position = block.required_field_position(VALUE_FIELD)?;
    let flat_position = block.required_field_position("index")?;
    let aux_position = block.field_position(AUX_VALUE_FIELD);

    // constant fields are authoritative
    let total = parse_usize(block.required_constant("ncoeffs_total")?, "ncoeffs_total")?;
    if total != space.total() {
        bail!(ConsistencyError {
            detail: format!(
                "file declares {} coefficients but this set has {}",
                total, space.total(),
            ),
        });
    }
    for (dim, label) in space.labels().iter().enumerate() {
        let name = format!("{}_ncoeffs", label);
        let extent = parse_usize(block.required_constant(&name)?, &name)?;
        if extent != space.extent(dim) {
            bail!(ConsistencyError {
                detail: format!(
                    "file declares extent {} along '{}' but this set has {}",
                    extent, label, space.extent(dim),
                ),
            });
        }
    }
    let file_label = block.required_constant("label")?.to_string();
    let _kind = block.required_constant("type")?;
    if file_label != v.label() {
        debug!("reading coefficients labeled '{}' into '{}'", file_label, v.label());
    }
    let iteration = match block.constant("iteration") {
        Some(token) => Some(parse_usize(token, "iteration")? as u64),
        None => None,
    };

    if block.rows.len() > total {
        bail!(ConsistencyError {
            detail: format!(
                "{} records for {} coefficients; multiple entries?",
                block.rows.len(), total,
            ),
        });
    }

    let mut seen = vec![false; total];
    let mut indices = vec![0; space.ndim()];
    for row in &block.rows {
        let token = |pos: usize| -> FailResult<&str> {
            row.get(pos).map(|s| &s[..]).ok_or_else(|| {
                ConsistencyError {
                    detail: format!("truncated record: {:?}", row.join(" ")),
                }.into()
            })
        };

        for (dim, &pos) in idx_positions.iter().enumerate() {
            let idx = parse_usize(token(pos)?, "index")?;
            if idx >= space.extent(dim) {
                bail!(ConsistencyError {
                    detail: format!(
                        "index {} out of range along '{}' (extent {})",
                        idx, space.label(dim), space.extent(dim),
                    ),
                });
            }
            indices[dim] = idx;
        }
        let flat = space.index_of(&indices);
        let stored_flat = parse_usize(token(flat_position)?, "flat index")?;
        if stored_flat != flat {
            bail!(ConsistencyError {
                detail: format!(
                    "stored flat index {} disagrees with {} recomputed from {:?}",
                    stored_flat, flat, indices,
                ),
            });
        }
        if seen[flat] {
            bail!(ConsistencyError {
                detail: format!("duplicate record for flat index {}", flat),
            });
        }
        seen[flat] = true;

        v.set_value(flat, parse_f64(token(value_position)?, "coefficient")?);
        if let Some(pos) = aux_position {
            if v.has_aux() {
                let aux = parse_f64(token(pos)?, "auxiliary coefficient")?;
                v.set_aux_value(flat, aux);
            }
        }
    }

    let n_read = block.rows.len();
    if n_read < total && !allow_partial {
        return Err(ShortReadError { expected: total, found: n_read }.into());
    }
    Ok(ReadOutcome { n_read, iteration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoeffsSpace, CoeffsMatrix, MatrixMode};
    use std::sync::Arc;

    fn vector_5(with_aux: bool) -> CoeffsVector {
        let space = Arc::new(CoeffsSpace::new(vec!["cv1"], vec![5]).unwrap());
        CoeffsVector::new(space, "coeffs", with_aux)
    }

    #[test]
    fn vector_round_trips_through_a_checkpoint() {
        let mut v = vector_5(true);
        v.assign_slice(&[0.25, -1.5, 3.125, 0.0, 1e-7]);
        for i in 0..5 {
            v.set_aux_value(i, 10.0 + i as f64);
        }
        v.set_counter(42);

        let mut buf = vec![];
        v.write_checkpoint(&mut buf, false).unwrap();

        let mut restored = vector_5(true);
        let outcome = restored
            .read_checkpoint(&mut &buf[..], false)
            .unwrap();
        assert_eq!(outcome.n_read, 5);
        assert_eq!(restored.counter(), 42);
        for i in 0..5 {
            assert!((restored.value(i) - v.value(i)).abs() < 1e-15);
            assert!((restored.aux_value(i) - v.aux_value(i)).abs() < 1e-15);
        }
    }

    #[test]
    fn multi_dimensional_round_trip_with_descriptions() {
        let space = Arc::new(
            CoeffsSpace::new(vec!["x", "y"], vec![3, 4]).unwrap()
                .with_basis_descriptors(vec!["FOURIER ORDER=1", "LEGENDRE ORDER=3"]).unwrap(),
        );
        let mut v = CoeffsVector::new(Arc::clone(&space), "coeffs", false);
        for i in 0..12 {
            v.set_value(i, (i as f64).sin());
        }

        let mut buf = vec![];
        v.write_checkpoint(&mut buf, true).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("#! SET x_basis {FOURIER ORDER=1}"));
        assert!(text.contains("#! SET y_ncoeffs 4"));
        assert!(text.ends_with("\n\n"));

        let mut restored = CoeffsVector::new(space, "coeffs", false);
        restored.read_checkpoint(&mut &buf[..], false).unwrap();
        for i in 0..12 {
            assert!((restored.value(i) - v.value(i)).abs() < 1e-15);
        }
    }

    #[test]
    fn short_body_needs_explicit_permission() {
        let mut v = vector_5(false);
        v.assign_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut buf = vec![];
        v.write_checkpoint(&mut buf, false).unwrap();

        // drop two data lines
        let text = String::from_utf8(buf).unwrap();
        let truncated: String = text.lines()
            .filter(|line| {
                let is_data = !line.starts_with('#') && !line.trim().is_empty();
                !(is_data && (line.contains(" 4.0") || line.contains(" 5.0")))
            })
            .map(|line| format!("{}\n", line))
            .collect();

        let mut target = vector_5(false);
        assert!(target.read_checkpoint(&mut truncated.as_bytes(), false).is_err());

        let mut target = vector_5(false);
        target.fill(-1.0);
        let outcome = target.read_checkpoint(&mut truncated.as_bytes(), true).unwrap();
        assert_eq!(outcome.n_read, 3);
        assert_eq!(target.value(1), 2.0);
        // untouched entries keep their prior values
        assert_eq!(target.value(4), -1.0);
    }

    #[test]
    fn corrupted_flat_index_is_rejected() {
        let mut v = vector_5(false);
        v.assign_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut buf = vec![];
        v.write_checkpoint(&mut buf, false).unwrap();

        let text = String::from_utf8(buf).unwrap()
            .lines()
            .map(|line| {
                // swap the stored flat index of the record for coefficient 2
                if !line.starts_with('#') && line.contains(" 3.0") {
                    let mut tokens: Vec<&str> = line.split_whitespace().collect();
                    *tokens.last_mut().unwrap() = "4";
                    format!(" {}", tokens.join(" "))
                } else {
                    line.to_string()
                }
            })
            .map(|line| format!("{}\n", line))
            .collect::<String>();

        let mut target = vector_5(false);
        let err = target.read_checkpoint(&mut text.as_bytes(), true).unwrap_err();
        assert!(err.to_string().contains("disagrees"));
    }

    #[test]
    fn foreign_dimension_labels_are_rejected() {
        let mut v = vector_5(false);
        let mut buf = vec![];
        v.write_checkpoint(&mut buf, false).unwrap();

        let space = Arc::new(CoeffsSpace::new(vec!["other"], vec![5]).unwrap());
        let mut target = CoeffsVector::new(space, "coeffs", false);
        let err = target.read_checkpoint(&mut &buf[..], false).unwrap_err();
        assert!(err.to_string().contains("dimension labels"));
    }

    #[test]
    fn mismatched_total_is_rejected() {
        let space = Arc::new(CoeffsSpace::new(vec!["cv1"], vec![4]).unwrap());
        let mut small = CoeffsVector::new(space, "coeffs", false);
        let mut buf = vec![];
        vector_5(false).write_checkpoint(&mut buf, false).unwrap();
        let err = small.read_checkpoint(&mut &buf[..], false).unwrap_err();
        assert!(err.to_string().contains("coefficients"));
    }

    #[test]
    fn missing_header_field_is_rejected() {
        let mut v = vector_5(false);
        let mut buf = vec![];
        v.write_checkpoint(&mut buf, false).unwrap();
        let text: String = String::from_utf8(buf).unwrap()
            .lines()
            .filter(|line| !line.starts_with("#! SET ncoeffs_total"))
            .map(|line| format!("{}\n", line))
            .collect();

        let mut target = vector_5(false);
        let err = target.read_checkpoint(&mut text.as_bytes(), false).unwrap_err();
        assert!(err.to_string().contains("ncoeffs_total"));
    }

    #[test]
    fn diagonal_matrix_body_is_vector_shaped() {
        let space = Arc::new(CoeffsSpace::new(vec!["x"], vec![3]).unwrap());
        let mut m = CoeffsMatrix::new(space, "hessian", MatrixMode::Diagonal);
        for i in 0..3 {
            m.set_value(i, i, i as f64);
        }
        let mut buf = vec![];
        m.write_checkpoint(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("#! SET diagonal_matrix true"));
        let data_lines: Vec<&str> = text.lines()
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .collect();
        assert_eq!(data_lines.len(), 3);
    }

    #[test]
    fn full_matrix_body_covers_the_whole_grid() {
        let space = Arc::new(CoeffsSpace::new(vec!["x"], vec![3]).unwrap());
        let mut m = CoeffsMatrix::new(space, "hessian", MatrixMode::Full);
        m.set_value(0, 2, 7.0);
        let mut buf = vec![];
        m.write_checkpoint(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("#! FIELDS idx_row idx_column coeff"));
        assert!(text.contains("#! SET diagonal_matrix false"));
        let data_lines: Vec<&str> = text.lines()
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .collect();
        // 3 x 3 grid, mirror cells included
        assert_eq!(data_lines.len(), 9);
        let mirrored = data_lines.iter()
            .filter(|l| l.contains("7.0"))
            .count();
        assert_eq!(mirrored, 2);
    }

    #[test]
    fn blocks_can_be_read_back_one_by_one() {
        let mut v = vector_5(false);
        let mut buf = vec![];
        v.assign_slice(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        v.set_counter(1);
        v.write_checkpoint(&mut buf, false).unwrap();
        v.assign_slice(&[2.0, 2.0, 2.0, 2.0, 2.0]);
        v.set_counter(2);
        v.write_checkpoint(&mut buf, false).unwrap();

        let mut reader = &buf[..];
        let mut target = vector_5(false);
        let first = target.read_checkpoint(&mut reader, false).unwrap();
        assert_eq!((first.iteration, target.value(0)), (Some(1), 1.0));
        let second = target.read_checkpoint(&mut reader, false).unwrap();
        assert_eq!((second.iteration, target.value(0)), (Some(2), 2.0));
    }
}
