//! JSON-lines stdio transport
//!
//! Requests arrive one per line on stdin:
//! `{"id": 1, "method": "highlight", "params": [bufnr, path, lines, end, refresh]}`.
//! Calls into the editor are written to stdout as
//! `{"method": "addHighlightMarks", "params": {...}}`; a request carrying
//! an `id` is answered with `{"id": 1, "result": ...}` or
//! `{"id": 1, "error": "..."}`.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::HostError;
use crate::highlight::{HighlightMark, LineRange};
use crate::host::{BufferId, Host};
use crate::request::Request;
use crate::sync::Highlighter;

/// One incoming line
#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// One outgoing call to the editor
#[derive(Debug, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
enum HostMessage<'a> {
    AddHighlightMarks {
        bufnr: BufferId,
        marks: &'a [HighlightMark],
    },
    RemoveHighlightMarks {
        bufnr: BufferId,
        start: usize,
        end: Option<usize>,
    },
    Disable {},
    OpenScratch {
        filetype: &'a str,
        lines: &'a [String],
    },
}

/// [`Host`] that writes calls as JSON lines
pub struct StdioHost<W: Write> {
    writer: W,
}

impl<W: Write> StdioHost<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send<T: Serialize>(&mut self, message: &T) -> Result<(), HostError> {
        serde_json::to_writer(&mut self.writer, message).map_err(|e| HostError(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> Host for StdioHost<W> {
    fn add_highlight_marks(
        &mut self,
        buffer: BufferId,
        marks: &[HighlightMark],
    ) -> Result<(), HostError> {
        self.send(&HostMessage::AddHighlightMarks {
            bufnr: buffer,
            marks,
        })
    }

    fn remove_highlight_marks(
        &mut self,
        buffer: BufferId,
        range: LineRange,
    ) -> Result<(), HostError> {
        self.send(&HostMessage::RemoveHighlightMarks {
            bufnr: buffer,
            start: range.start,
            end: range.end,
        })
    }

    fn disable(&mut self) -> Result<(), HostError> {
        self.send(&HostMessage::Disable {})
    }

    fn open_scratch(&mut self, filetype: &str, lines: &[String]) -> Result<(), HostError> {
        self.send(&HostMessage::OpenScratch { filetype, lines })
    }
}

/// Serve requests from `input` until end of stream.
///
/// Besides the request methods, `enable` re-arms highlighting after a
/// failure disabled it.
pub fn serve<R: BufRead, W: Write>(
    input: R,
    output: W,
    highlighter: &mut Highlighter,
) -> anyhow::Result<()> {
    let mut host = StdioHost::new(output);

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let incoming: Incoming = match serde_json::from_str(&line) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };
        tracing::debug!("Request {}", incoming.method);

        let reply = if incoming.method == "enable" {
            highlighter.enable();
            Ok(Value::Null)
        } else {
            match Request::from_call(&incoming.method, &incoming.params) {
                Ok(request) => {
                    let outcome = highlighter.handle(&mut host, &request);
                    Ok(serde_json::to_value(outcome)?)
                }
                Err(e) => {
                    tracing::warn!("Rejected request: {}", e);
                    Err(e.to_string())
                }
            }
        };

        if let Some(id) = incoming.id {
            let response = match reply {
                Ok(result) => json!({ "id": id, "result": result }),
                Err(error) => json!({ "id": id, "error": error }),
            };
            host.send(&response)?;
        }
    }

    tracing::info!("Input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_messages() {
        let mut host = StdioHost::new(Vec::new());
        let marks = vec![HighlightMark {
            line: 0,
            start_col: 1,
            end_col: 3,
            group: "Keyword".into(),
        }];
        host.add_highlight_marks(BufferId(2), &marks).unwrap();
        host.remove_highlight_marks(BufferId(2), LineRange::starting_at(4))
            .unwrap();
        host.disable().unwrap();

        let out = String::from_utf8(host.into_inner()).unwrap();
        let messages: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            messages,
            vec![
                json!({"method": "addHighlightMarks", "params": {
                    "bufnr": 2,
                    "marks": [{"line": 0, "start_col": 1, "end_col": 3, "group": "Keyword"}]
                }}),
                json!({"method": "removeHighlightMarks", "params": {
                    "bufnr": 2, "start": 4, "end": null
                }}),
                json!({"method": "disable", "params": {}}),
            ]
        );
    }
}
