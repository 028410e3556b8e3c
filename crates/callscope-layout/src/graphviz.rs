//! Graphviz `dot` as the layout oracle
//!
//! Requests are DOT digraphs; responses are read from the `plain` output
//! format (`graph`, `node`, `edge` and `stop` lines).

use crate::oracle::{Extent, LayoutError, LayoutOracle, LayoutRequest, RawLayout};
use callscope_core::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Configuration of the `dot` executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphvizSettings {
    pub dot_path: PathBuf,
    pub rank_dir: String,
}

impl Default for GraphvizSettings {
    fn default() -> Self {
        GraphvizSettings {
            dot_path: PathBuf::from("dot"),
            rank_dir: "LR".to_string(),
        }
    }
}

/// Runs `dot -Tplain` once per request.
#[derive(Debug, Clone, Default)]
pub struct GraphvizOracle {
    settings: GraphvizSettings,
}

impl GraphvizOracle {
    pub fn new(settings: GraphvizSettings) -> Self {
        GraphvizOracle { settings }
    }

    fn run_dot(&self, dot: &str) -> Result<String, LayoutError> {
        let mut child = Command::new(&self.settings.dot_path)
            .arg("-Tplain")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                LayoutError::Unavailable(format!("{}: {}", self.settings.dot_path.display(), e))
            })?;

        // Feed stdin from a separate thread so stdout and stderr drain while dot reads.
        let writer = child.stdin.take().map(|mut stdin| {
            let dot = dot.to_string();
            std::thread::spawn(move || stdin.write_all(dot.as_bytes()))
        });

        // Always reaped, even when sending the graph failed.
        let output = child
            .wait_with_output()
            .map_err(|e| LayoutError::Unavailable(e.to_string()))?;
        let sent = match writer.map(|writer| writer.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(std::io::Error::other("stdin writer panicked")),
            None => Ok(()),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("dot exited with {}: {}", output.status, stderr.trim());
            return Err(LayoutError::Unavailable(format!(
                "dot exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        sent.map_err(|e| LayoutError::Unavailable(format!("failed to send graph: {}", e)))?;

        String::from_utf8(output.stdout)
            .map_err(|_| LayoutError::Malformed("output is not valid UTF-8".to_string()))
    }
}

impl LayoutOracle for GraphvizOracle {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError> {
        let dot = to_dot(request, &self.settings.rank_dir);
        debug!(
            "Running {} on {} nodes, {} edges",
            self.settings.dot_path.display(),
            request.nodes.len(),
            request.edges.len()
        );
        let plain = self.run_dot(&dot)?;
        let layout = parse_plain(&plain)?;

        if let Some(missing) = request.nodes.iter().find(|n| !layout.positions.contains_key(*n)) {
            return Err(LayoutError::Malformed(format!("no position for node {}", missing)));
        }
        Ok(layout)
    }
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render a request as a DOT digraph. Each node is followed by its outgoing links.
pub fn to_dot(request: &LayoutRequest, rank_dir: &str) -> String {
    let mut links: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, target) in &request.edges {
        links.entry(source.as_str()).or_default().push(target.as_str());
    }

    let mut dot = String::new();
    let _ = writeln!(dot, "digraph callgraph {{");
    let _ = writeln!(dot, "  rankdir={};", rank_dir);
    for node in &request.nodes {
        let _ = writeln!(dot, "  {};", quote(node));
        for target in links.get(node.as_str()).into_iter().flatten() {
            let _ = writeln!(dot, "  {} -> {};", quote(node), quote(target));
        }
    }
    let _ = writeln!(dot, "}}");
    dot
}

fn number(field: Option<&str>, line_no: usize) -> Result<f64, LayoutError> {
    let raw = field.ok_or_else(|| LayoutError::Malformed(format!("line {}: missing field", line_no)))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| LayoutError::Malformed(format!("line {}: not a number: {}", line_no, raw)))?;
    if !value.is_finite() {
        return Err(LayoutError::Malformed(format!("line {}: non-finite value", line_no)));
    }
    Ok(value)
}

/// Parse `dot -Tplain` output. The y axis is flipped so it grows downward.
pub fn parse_plain(text: &str) -> Result<RawLayout, LayoutError> {
    let mut extent: Option<Extent> = None;
    let mut positions = HashMap::new();
    let mut stopped = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut fields = line.split_whitespace();
        match fields.next() {
            None => continue,
            Some("graph") => {
                let _scale = number(fields.next(), line_no)?;
                extent = Some(Extent {
                    width: number(fields.next(), line_no)?,
                    height: number(fields.next(), line_no)?,
                });
            }
            Some("node") => {
                let height = extent
                    .ok_or_else(|| LayoutError::Malformed(format!("line {}: node before graph header", line_no)))?
                    .height;
                let name = fields
                    .next()
                    .ok_or_else(|| LayoutError::Malformed(format!("line {}: node without a name", line_no)))?
                    .trim_matches('"')
                    .to_string();
                let x = number(fields.next(), line_no)?;
                let y = number(fields.next(), line_no)?;
                positions.insert(name, Point::new(x, height - y));
            }
            Some("edge") => {}
            Some("stop") => {
                stopped = true;
                break;
            }
            Some(other) => {
                return Err(LayoutError::Malformed(format!(
                    "line {}: unexpected statement {}",
                    line_no, other
                )));
            }
        }
    }

    if !stopped {
        return Err(LayoutError::Malformed("output ended before stop".to_string()));
    }
    let extent = extent.ok_or_else(|| LayoutError::Malformed("missing graph header".to_string()))?;
    Ok(RawLayout { positions, extent })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LayoutRequest {
        LayoutRequest {
            nodes: vec!["a".into(), "b".into(), "c".into()],
            edges: vec![("a".into(), "b".into()), ("a".into(), "c".into()), ("b".into(), "c".into())],
        }
    }

    #[test]
    fn test_to_dot() {
        let dot = to_dot(&request(), "LR");
        insta::assert_snapshot!(dot, @r#"
        digraph callgraph {
          rankdir=LR;
          "a";
          "a" -> "b";
          "a" -> "c";
          "b";
          "b" -> "c";
          "c";
        }
        "#);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_parse_plain() {
        let plain = "graph 1 2.75 1.5\n\
                     node a 0.375 0.75 0.75 0.5 a solid ellipse black lightgrey\n\
                     node b 1.375 1.25 0.75 0.5 b solid ellipse black lightgrey\n\
                     edge a b 4 0.75 0.75 0.9 0.75 1 0.75 1.1 0.75 solid black\n\
                     stop\n";
        let layout = parse_plain(plain).unwrap();

        assert_eq!(layout.extent, Extent { width: 2.75, height: 1.5 });
        assert_eq!(layout.positions["a"], Point::new(0.375, 0.75));
        assert_eq!(layout.positions["b"], Point::new(1.375, 0.25));
    }

    #[test]
    fn test_parse_plain_rejects_garbage() {
        let truncated = "graph 1 2 2\nnode a 1 1 0.75 0.5 a solid ellipse black lightgrey\n";
        assert!(matches!(parse_plain(truncated), Err(LayoutError::Malformed(_))));

        let headless = "node a 1 1 0.75 0.5\nstop\n";
        assert!(matches!(parse_plain(headless), Err(LayoutError::Malformed(_))));

        let not_a_number = "graph 1 2 2\nnode a one 1\nstop\n";
        assert!(matches!(parse_plain(not_a_number), Err(LayoutError::Malformed(_))));

        let infinite = "graph 1 2 2\nnode a inf 1\nstop\n";
        assert!(matches!(parse_plain(infinite), Err(LayoutError::Malformed(_))));
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let oracle = GraphvizOracle::new(GraphvizSettings {
            dot_path: PathBuf::from("/nonexistent/graphviz/dot"),
            ..GraphvizSettings::default()
        });
        assert!(matches!(oracle.layout(&request()), Err(LayoutError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_dot_that_ignores_input_is_reaped() {
        // `true` exits without reading, so writing the graph may hit a closed pipe
        let oracle = GraphvizOracle::new(GraphvizSettings {
            dot_path: PathBuf::from("true"),
            ..GraphvizSettings::default()
        });
        let nodes: Vec<String> = (0..20_000).map(|i| format!("node_{}", i)).collect();
        let edges = nodes.windows(2).map(|w| (w[0].clone(), w[1].clone())).collect();
        let large = LayoutRequest { nodes, edges };

        assert!(oracle.layout(&large).is_err());
        assert!(oracle.layout(&request()).is_err());
    }
}
