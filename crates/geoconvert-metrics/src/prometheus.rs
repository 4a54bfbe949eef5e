//! Prometheus text exposition format.

use crate::collector::OperationSnapshot;

/// Point-in-time service gauges sampled at scrape time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gauges {
    pub staged_requests: usize,
    pub staged_bytes: u64,
    pub available_workers: usize,
    pub max_workers: usize,
}

/// Render operation snapshots and gauges into Prometheus text format.
///
/// Counters carry `operation` and `outcome` labels; latency gauges are
/// computed over the recent sample window.
pub fn render_prometheus(snapshots: &[OperationSnapshot], gauges: &Gauges) -> String {
    let mut out = String::new();

    out.push_str("# HELP geoconvert_operations_total Finished operations by outcome.\n");
    out.push_str("# TYPE geoconvert_operations_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "geoconvert_operations_total{{{}}} {}\n",
            labels(s),
            s.count
        ));
    }

    out.push_str("# HELP geoconvert_input_bytes_total Bytes received in uploads.\n");
    out.push_str("# TYPE geoconvert_input_bytes_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "geoconvert_input_bytes_total{{{}}} {}\n",
            labels(s),
            s.bytes_in
        ));
    }

    out.push_str("# HELP geoconvert_output_bytes_total Bytes returned to callers.\n");
    out.push_str("# TYPE geoconvert_output_bytes_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "geoconvert_output_bytes_total{{{}}} {}\n",
            labels(s),
            s.bytes_out
        ));
    }

    out.push_str("# HELP geoconvert_latency_p50_ms P50 latency in milliseconds.\n");
    out.push_str("# TYPE geoconvert_latency_p50_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "geoconvert_latency_p50_ms{{{}}} {:.2}\n",
            labels(s),
            s.latency_p50_ms
        ));
    }

    out.push_str("# HELP geoconvert_latency_p99_ms P99 latency in milliseconds.\n");
    out.push_str("# TYPE geoconvert_latency_p99_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "geoconvert_latency_p99_ms{{{}}} {:.2}\n",
            labels(s),
            s.latency_p99_ms
        ));
    }

    gauge(
        &mut out,
        "geoconvert_staged_requests",
        "Request directories currently staged.",
        gauges.staged_requests as u64,
    );
    gauge(
        &mut out,
        "geoconvert_staged_bytes",
        "Bytes currently held in staging.",
        gauges.staged_bytes,
    );
    gauge(
        &mut out,
        "geoconvert_workers_available",
        "Conversion workers not running a job.",
        gauges.available_workers as u64,
    );
    gauge(
        &mut out,
        "geoconvert_workers_max",
        "Size of the conversion worker pool.",
        gauges.max_workers as u64,
    );

    out
}

fn labels(s: &OperationSnapshot) -> String {
    format!(
        "operation=\"{}\",outcome=\"{}\"",
        escape(&s.operation),
        escape(&s.outcome)
    )
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n"));
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot(operation: &str, outcome: &str) -> OperationSnapshot {
        OperationSnapshot {
            operation: operation.to_string(),
            outcome: outcome.to_string(),
            count: 12,
            bytes_in: 4096,
            bytes_out: 2048,
            latency_p50_ms: 5.2,
            latency_p99_ms: 45.8,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[], &Gauges::default());
        assert!(output.contains("# TYPE geoconvert_operations_total counter"));
        assert!(output.contains("geoconvert_staged_requests 0"));
    }

    #[test]
    fn render_single_bucket() {
        let gauges = Gauges {
            staged_requests: 2,
            staged_bytes: 1024,
            available_workers: 3,
            max_workers: 4,
        };
        let output = render_prometheus(&[test_snapshot("convert", "ok")], &gauges);

        assert!(output.contains("geoconvert_operations_total{operation=\"convert\",outcome=\"ok\"} 12"));
        assert!(output.contains("geoconvert_input_bytes_total{operation=\"convert\",outcome=\"ok\"} 4096"));
        assert!(output.contains("geoconvert_latency_p50_ms{operation=\"convert\",outcome=\"ok\"} 5.20"));
        assert!(output.contains("geoconvert_latency_p99_ms{operation=\"convert\",outcome=\"ok\"} 45.80"));
        assert!(output.contains("geoconvert_staged_bytes 1024"));
        assert!(output.contains("geoconvert_workers_available 3"));
        assert!(output.contains("geoconvert_workers_max 4"));
    }

    #[test]
    fn label_values_are_escaped() {
        let output = render_prometheus(&[test_snapshot("con\"vert", "o\\k")], &Gauges::default());
        assert!(output.contains("operation=\"con\\\"vert\",outcome=\"o\\\\k\""));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(
            &[test_snapshot("convert", "ok"), test_snapshot("inspect", "invalid_input")],
            &Gauges::default(),
        );
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad sample line: {line}");
        }
    }
}
