// SPDX-License-Identifier: Apache-2.0

//! Encodes pdata batches to the OTLP/HTTP JSON body shape (§4.4, §8.5:
//! "the OTLP protobuf schema itself... is out of scope; the in-memory model
//! and export contract are what this exporter implements"). `dbscope_pdata`
//! types intentionally don't derive `Serialize` (processors mutate them far
//! more than they're serialized), so this module is the one place that
//! knows how to turn a batch into wire bytes.

use dbscope_pdata::{
    AnyBatch, AttributeValue, Attributes, LogBody, LogsBatch, Metric, MetricKind, MetricsBatch,
    NumberValue, Resource, Span, TracesBatch,
};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn attribute_value_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => json!(s),
        AttributeValue::Int(i) => json!(i),
        AttributeValue::Double(d) => json!(d),
        AttributeValue::Bool(b) => json!(b),
        AttributeValue::Bytes(b) => json!(b),
    }
}

fn attributes_json(attrs: &Attributes) -> Value {
    Value::Array(
        attrs
            .iter()
            .map(|(k, v)| json!({"key": k, "value": attribute_value_json(v)}))
            .collect(),
    )
}

fn resource_json(resource: &Resource) -> Value {
    json!({"attributes": attributes_json(resource.attributes())})
}

fn metric_points_json(metric: &Metric) -> Value {
    match &metric.kind {
        MetricKind::Gauge(points) => json!({
            "gauge": {
                "dataPoints": points.iter().map(|p| json!({
                    "startTimeUnixNano": p.start_time.map(unix_nanos),
                    "timeUnixNano": unix_nanos(p.time),
                    "attributes": attributes_json(&p.attributes),
                    "value": match p.value {
                        NumberValue::Int(i) => json!(i),
                        NumberValue::Double(d) => json!(d),
                    },
                })).collect::<Vec<_>>(),
            }
        }),
        MetricKind::Sum { points, temporality, monotonic } => json!({
            "sum": {
                "aggregationTemporality": format!("{temporality:?}"),
                "isMonotonic": monotonic,
                "dataPoints": points.iter().map(|p| json!({
                    "startTimeUnixNano": p.start_time.map(unix_nanos),
                    "timeUnixNano": unix_nanos(p.time),
                    "attributes": attributes_json(&p.attributes),
                    "value": match p.value {
                        NumberValue::Int(i) => json!(i),
                        NumberValue::Double(d) => json!(d),
                    },
                })).collect::<Vec<_>>(),
            }
        }),
        MetricKind::Histogram(points) => json!({
            "histogram": {
                "dataPoints": points.iter().map(|p| json!({
                    "startTimeUnixNano": p.start_time.map(unix_nanos),
                    "timeUnixNano": unix_nanos(p.time),
                    "attributes": attributes_json(&p.attributes),
                    "count": p.count,
                    "sum": p.sum,
                    "explicitBounds": p.bucket_bounds,
                    "bucketCounts": p.bucket_counts,
                    "min": p.min,
                    "max": p.max,
                })).collect::<Vec<_>>(),
            }
        }),
        MetricKind::ExponentialHistogram(points) => json!({
            "exponentialHistogram": {
                "dataPoints": points.iter().map(|p| json!({
                    "startTimeUnixNano": p.start_time.map(unix_nanos),
                    "timeUnixNano": unix_nanos(p.time),
                    "attributes": attributes_json(&p.attributes),
                    "count": p.count,
                    "sum": p.sum,
                    "scale": p.scale,
                    "zeroCount": p.zero_count,
                    "positive": {
                        "offset": p.positive_offset,
                        "bucketCounts": p.positive_bucket_counts,
                    },
                })).collect::<Vec<_>>(),
            }
        }),
        MetricKind::Summary(points) => json!({
            "summary": {
                "dataPoints": points.iter().map(|p| json!({
                    "startTimeUnixNano": p.start_time.map(unix_nanos),
                    "timeUnixNano": unix_nanos(p.time),
                    "attributes": attributes_json(&p.attributes),
                    "count": p.count,
                    "sum": p.sum,
                    "quantileValues": p.quantiles.iter().map(|q| json!({
                        "quantile": q.quantile,
                        "value": q.value,
                    })).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
            }
        }),
    }
}

/// Encodes a metrics batch as `{"resourceMetrics": [...]}`.
#[must_use]
pub fn encode_metrics(batch: &MetricsBatch) -> Value {
    json!({
        "resourceMetrics": batch.resource_sets.iter().map(|rs| json!({
            "resource": resource_json(&rs.resource),
            "scopeMetrics": rs.scopes.iter().map(|scope| json!({
                "scope": {"name": scope.name, "version": scope.version},
                "metrics": scope.items.iter().map(|metric| {
                    let mut m = json!({
                        "name": metric.name,
                        "unit": metric.unit,
                        "description": metric.description,
                    });
                    if let Value::Object(ref mut obj) = m {
                        if let Value::Object(kind) = metric_points_json(metric) {
                            obj.extend(kind);
                        }
                    }
                    m
                }).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

fn log_body_json(body: &LogBody) -> Value {
    json!({"stringValue": body.as_str()})
}

/// Encodes a logs batch as `{"resourceLogs": [...]}`.
#[must_use]
pub fn encode_logs(batch: &LogsBatch) -> Value {
    json!({
        "resourceLogs": batch.resource_sets.iter().map(|rs| json!({
            "resource": resource_json(&rs.resource),
            "scopeLogs": rs.scopes.iter().map(|scope| json!({
                "scope": {"name": scope.name, "version": scope.version},
                "logRecords": scope.items.iter().map(|record| json!({
                    "timeUnixNano": unix_nanos(record.time),
                    "severityNumber": record.severity.code(),
                    "body": log_body_json(&record.body),
                    "attributes": attributes_json(&record.attributes),
                    "traceId": record.trace_id.map(|id| id.to_string()),
                    "spanId": record.span_id.map(|id| id.to_string()),
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

fn span_json(span: &Span) -> Value {
    json!({
        "traceId": span.trace_id.to_string(),
        "spanId": span.span_id.to_string(),
        "parentSpanId": span.parent_span_id.map(|id| id.to_string()),
        "name": span.name,
        "kind": format!("{:?}", span.kind),
        "startTimeUnixNano": unix_nanos(span.start),
        "endTimeUnixNano": unix_nanos(span.end),
        "attributes": attributes_json(&span.attributes),
        "events": span.events.iter().map(|e| json!({
            "name": e.name,
            "timeUnixNano": unix_nanos(e.time),
            "attributes": attributes_json(&e.attributes),
        })).collect::<Vec<_>>(),
        "links": span.links.iter().map(|l| json!({
            "traceId": l.trace_id.to_string(),
            "spanId": l.span_id.to_string(),
            "attributes": attributes_json(&l.attributes),
        })).collect::<Vec<_>>(),
        "status": {
            "code": format!("{:?}", span.status.code),
            "message": span.status.message,
        },
    })
}

/// Encodes a traces batch as `{"resourceSpans": [...]}`.
#[must_use]
pub fn encode_traces(batch: &TracesBatch) -> Value {
    json!({
        "resourceSpans": batch.resource_sets.iter().map(|rs| json!({
            "resource": resource_json(&rs.resource),
            "scopeSpans": rs.scopes.iter().map(|scope| json!({
                "scope": {"name": scope.name, "version": scope.version},
                "spans": scope.items.iter().map(span_json).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

/// Encodes any batch to its JSON body, dispatching on signal type.
#[must_use]
pub fn encode(batch: &AnyBatch) -> Value {
    match batch {
        AnyBatch::Metrics(b) => encode_metrics(b),
        AnyBatch::Logs(b) => encode_logs(b),
        AnyBatch::Traces(b) => encode_traces(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_pdata::{LogRecord, Severity};

    #[test]
    fn logs_batch_encodes_body_and_attributes() {
        let mut record = LogRecord::new(SystemTime::now(), Severity::INFO, "hello");
        record.attributes.insert("db.system", "postgresql");
        let mut batch = LogsBatch::empty();
        batch.resource_sets.push(dbscope_pdata::ResourceSet::new(Resource::new(Attributes::new())));
        batch.resource_sets[0]
            .push_scope(dbscope_pdata::Scope::new("receiver", "1.0").with_item(record))
            .unwrap();

        let encoded = encode_logs(&batch);
        let record_json = &encoded["resourceLogs"][0]["scopeLogs"][0]["logRecords"][0];
        assert_eq!(record_json["body"]["stringValue"], json!("hello"));
        assert_eq!(record_json["attributes"][0]["key"], json!("db.system"));
    }

    #[test]
    fn empty_metrics_batch_encodes_to_empty_array() {
        let batch = MetricsBatch::empty();
        assert_eq!(encode_metrics(&batch), json!({"resourceMetrics": []}));
    }
}
