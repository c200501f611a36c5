//! Text renderings of a collected statistics tree.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unknown statistics format '{0}'")]
    Unknown(String),
}

/// Output format for [`render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsFormat {
    /// The JSON tree as is.
    #[default]
    Internal,
    /// `dotted.path value` lines.
    Graphite,
    /// Prometheus exposition with a `# TYPE ... gauge` line per metric.
    Prometheus,
    /// Prometheus exposition without type lines.
    PrometheusUntyped,
}

impl FromStr for StatsFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "internal" | "json" => Ok(StatsFormat::Internal),
            "graphite" => Ok(StatsFormat::Graphite),
            "prometheus" => Ok(StatsFormat::Prometheus),
            "prometheus-untyped" => Ok(StatsFormat::PrometheusUntyped),
            other => Err(FormatError::Unknown(other.to_string())),
        }
    }
}

/// Render `tree` in `format`. Only numeric and boolean leaves appear in the
/// line-based formats; strings and nulls are skipped.
pub fn render(tree: &Value, format: StatsFormat) -> String {
    if format == StatsFormat::Internal {
        return serde_json::to_string_pretty(tree).unwrap_or_else(|_| tree.to_string());
    }

    let mut leaves = Vec::new();
    collect_leaves(tree, &mut Vec::new(), &mut leaves);

    let mut out = String::new();
    for (path, value) in leaves {
        let _ = match format {
            StatsFormat::Graphite => writeln!(out, "{} {}", path.join("."), value),
            StatsFormat::Prometheus => {
                let name = metric_name(&path);
                writeln!(out, "# TYPE {name} gauge\n{name} {value}")
            }
            StatsFormat::PrometheusUntyped => writeln!(out, "{} {}", metric_name(&path), value),
            StatsFormat::Internal => Ok(()),
        };
    }
    out
}

fn collect_leaves<'a>(node: &'a Value, path: &mut Vec<&'a str>, out: &mut Vec<(Vec<&'a str>, String)>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key);
                collect_leaves(child, path, out);
                path.pop();
            }
        }
        Value::Number(n) => out.push((path.clone(), n.to_string())),
        Value::Bool(b) => out.push((path.clone(), u8::from(*b).to_string())),
        Value::Array(_) | Value::String(_) | Value::Null => {}
    }
}

/// `a.b-c.d` -> `a_b_c_d`; a leading digit gets an underscore prefix.
fn metric_name(path: &[&str]) -> String {
    let mut name: String = path
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "components": {
                "counts": {"ready": 3, "failed": 0},
                "run_state": "completed",
                "healthy": true
            },
            "http-server": {"rps": 12.5}
        })
    }

    #[test]
    fn parse_formats() {
        assert_eq!("".parse::<StatsFormat>().unwrap(), StatsFormat::Internal);
        assert_eq!(
            "prometheus-untyped".parse::<StatsFormat>().unwrap(),
            StatsFormat::PrometheusUntyped
        );
        assert_eq!(
            "solomon".parse::<StatsFormat>(),
            Err(FormatError::Unknown("solomon".into()))
        );
    }

    #[test]
    fn prometheus_untyped_flattens_numeric_leaves() {
        let text = render(&tree(), StatsFormat::PrometheusUntyped);
        let mut lines: Vec<_> = text.lines().collect();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "components_counts_failed 0",
                "components_counts_ready 3",
                "components_healthy 1",
                "http_server_rps 12.5",
            ]
        );
    }

    #[test]
    fn prometheus_adds_type_lines() {
        let text = render(&json!({"a": {"b": 1}}), StatsFormat::Prometheus);
        assert_eq!(text, "# TYPE a_b gauge\na_b 1\n");
    }

    #[test]
    fn graphite_keeps_dotted_paths() {
        let text = render(&json!({"a": {"b": 2}}), StatsFormat::Graphite);
        assert_eq!(text, "a.b 2\n");
    }

    #[test]
    fn internal_is_json() {
        let text = render(&tree(), StatsFormat::Internal);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, tree());
    }

    #[test]
    fn metric_names_are_sanitised() {
        assert_eq!(metric_name(&["9lives", "x.y"]), "_9lives_x_y");
    }
}
