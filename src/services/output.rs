use crate::domain::models::{JsonOut, SummaryRow};
use serde::Serialize;

/// Prints `data` as a `{ok, data}` JSON envelope, or through `text` otherwise.
pub fn emit<T: Serialize>(json: bool, data: &T, text: impl Fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut { ok: true, data })?
        );
    } else {
        let body = text(data);
        if !body.is_empty() {
            println!("{}", body);
        }
    }
    Ok(())
}

/// One line per element in text mode.
pub fn emit_rows<T: Serialize>(
    json: bool,
    data: &[T],
    row: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    emit(json, &data, |rows| {
        rows.iter().map(&row).collect::<Vec<_>>().join("\n")
    })
}

fn num(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.abs() >= 1e4 || (v != 0.0 && v.abs() < 1e-3) {
        format!("{:.2e}", v)
    } else {
        format!("{:.3}", v)
    }
}

/// Fixed-width summary table in the column order of `SummaryRow`.
pub fn summary_table(rows: &[SummaryRow]) -> String {
    let name_width = rows
        .iter()
        .map(|r| r.name.len())
        .chain(std::iter::once(4))
        .max()
        .unwrap_or(4);
    let mut out = format!(
        "{:<w$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "name", "mean", "mcse", "sd", "5%", "50%", "95%", "n_eff", "r_hat",
        w = name_width
    );
    for r in rows {
        out.push('\n');
        out.push_str(&format!(
            "{:<w$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            r.name,
            num(r.mean),
            num(r.mcse),
            num(r.sd),
            num(r.q5),
            num(r.q50),
            num(r.q95),
            num(r.n_eff),
            num(r.r_hat),
            w = name_width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_table_aligns_columns() {
        let rows = vec![SummaryRow {
            name: "theta".to_string(),
            mean: 0.25,
            mcse: 0.0004,
            sd: 0.12,
            q5: 0.07,
            q50: 0.24,
            q95: 0.46,
            n_eff: 1500.0,
            r_hat: f64::NAN,
        }];
        let table = summary_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), lines[1].len());
        assert!(lines[1].starts_with("theta"));
        assert!(lines[1].contains("4.00e-4"));
        assert!(lines[1].ends_with("nan"));
    }
}
