//! Tiny stdio JSON-RPC echo server used by the toolcall integration tests.
//! Reads newline-delimited JSON-RPC requests on stdin, replies on stdout
//! with a result echoing the request's method and params. A method named
//! `"fail"` replies with a JSON-RPC error instead, so tests can exercise
//! the application-error path without a live provider.

use std::io::{self, BufRead, Write};

fn main() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default();

        let response = if method == "fail" {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": "intentional failure"},
            })
        } else {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"method": method, "params": request.get("params")},
            })
        };

        let _ = writeln!(stdout, "{response}");
        let _ = stdout.flush();
    }
}
