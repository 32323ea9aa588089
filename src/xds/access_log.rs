//! File access logs for listeners, connection managers and TCP proxies
//!
//! Every proxy writes one JSON line per request or connection to the
//! configured path (stdout by default). The format is an Envoy
//! substitution-format `Struct`, so operators can replace it with their own
//! JSON object through [`AccessLogConfig::json_format`].

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::core::v3::{
    substitution_format_string::Format, SubstitutionFormatString,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::{
    file_access_log::AccessLogFormat, FileAccessLog,
};
use envoy_types::pb::google::protobuf::{value::Kind, ListValue, Struct, Value};
use serde_json::{Map, Value as JsonValue};

use crate::config::AccessLogConfig;
use crate::xds::filters::any_from_message;
use crate::Result;

pub const FILE_ACCESS_LOG_NAME: &str = "envoy.access_loggers.file";
pub const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";

/// Field name to command operator of the default JSON access log line.
const DEFAULT_FORMAT: &[(&str, &str)] = &[
    ("start_time", "%START_TIME%"),
    ("method", "%REQ(:METHOD)%"),
    ("path", "%REQ(X-ENVOY-ORIGINAL-PATH?:PATH)%"),
    ("protocol", "%PROTOCOL%"),
    ("response_code", "%RESPONSE_CODE%"),
    ("response_code_details", "%RESPONSE_CODE_DETAILS%"),
    ("time_to_first_byte", "%RESPONSE_DURATION%"),
    ("upstream_cluster", "%UPSTREAM_CLUSTER%"),
    ("response_flags", "%RESPONSE_FLAGS%"),
    ("bytes_received", "%BYTES_RECEIVED%"),
    ("bytes_sent", "%BYTES_SENT%"),
    ("duration", "%DURATION%"),
    ("upstream_service_time", "%RESP(X-ENVOY-UPSTREAM-SERVICE-TIME)%"),
    ("x_forwarded_for", "%REQ(X-FORWARDED-FOR)%"),
    ("user_agent", "%REQ(USER-AGENT)%"),
    ("request_id", "%REQ(X-REQUEST-ID)%"),
    ("requested_server_name", "%REQUESTED_SERVER_NAME%"),
    ("authority", "%REQ(:AUTHORITY)%"),
    ("upstream_host", "%UPSTREAM_HOST%"),
];

/// The built-in JSON format as a JSON object.
pub fn default_json_format() -> Map<String, JsonValue> {
    DEFAULT_FORMAT
        .iter()
        .map(|(field, operator)| (field.to_string(), JsonValue::String(operator.to_string())))
        .collect()
}

/// Access logs to attach, empty when access logging is disabled.
///
/// Fails when the configured format holds a number that cannot be
/// represented as a protobuf double.
pub fn access_logs(config: &AccessLogConfig) -> Result<Vec<AccessLog>> {
    if !config.enabled {
        return Ok(Vec::new());
    }

    let format = match &config.json_format {
        Some(custom) => json_to_struct(custom)?,
        None => json_to_struct(&default_json_format())?,
    };

    let file_log = FileAccessLog {
        path: config.path.clone(),
        access_log_format: Some(AccessLogFormat::LogFormat(SubstitutionFormatString {
            format: Some(Format::JsonFormat(format)),
            ..Default::default()
        })),
    };

    Ok(vec![AccessLog {
        name: FILE_ACCESS_LOG_NAME.to_string(),
        config_type: Some(AccessLogConfigType::TypedConfig(any_from_message(
            FILE_ACCESS_LOG_TYPE_URL,
            &file_log,
        ))),
        ..Default::default()
    }])
}

/// Converts a JSON object into a protobuf `Struct`.
pub fn json_to_struct(map: &Map<String, JsonValue>) -> Result<Struct> {
    let fields = map
        .iter()
        .map(|(key, value)| Ok((key.clone(), json_to_proto_value(value)?)))
        .collect::<Result<_>>()?;
    Ok(Struct { fields })
}

fn json_to_proto_value(json: &JsonValue) -> Result<Value> {
    let kind = match json {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(*b),
        JsonValue::Number(n) => {
            // Protobuf only has double for numbers
            let num = n
                .as_f64()
                .ok_or_else(|| crate::Error::config(format!("Cannot convert number {} to f64", n)))?;
            Kind::NumberValue(num)
        }
        JsonValue::String(s) => Kind::StringValue(s.clone()),
        JsonValue::Array(arr) => {
            let values: Result<Vec<Value>> = arr.iter().map(json_to_proto_value).collect();
            Kind::ListValue(ListValue { values: values? })
        }
        JsonValue::Object(map) => Kind::StructValue(json_to_struct(map)?),
    };

    Ok(Value { kind: Some(kind) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::decode_any;

    fn decode(log: &AccessLog) -> FileAccessLog {
        match &log.config_type {
            Some(AccessLogConfigType::TypedConfig(any)) => decode_any(any, FILE_ACCESS_LOG_TYPE_URL).unwrap(),
            other => panic!("unexpected config {:?}", other),
        }
    }

    fn json_format(file_log: &FileAccessLog) -> &Struct {
        match &file_log.access_log_format {
            Some(AccessLogFormat::LogFormat(SubstitutionFormatString {
                format: Some(Format::JsonFormat(format)),
                ..
            })) => format,
            other => panic!("unexpected format {:?}", other),
        }
    }

    #[test]
    fn default_log_writes_json_to_stdout() {
        let logs = access_logs(&AccessLogConfig::default()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, FILE_ACCESS_LOG_NAME);

        let file_log = decode(&logs[0]);
        assert_eq!(file_log.path, "/dev/stdout");
        let format = json_format(&file_log);
        assert_eq!(format.fields.len(), DEFAULT_FORMAT.len());
        assert_eq!(
            format.fields["path"].kind,
            Some(Kind::StringValue("%REQ(X-ENVOY-ORIGINAL-PATH?:PATH)%".into()))
        );
        assert_eq!(format.fields["request_id"].kind, Some(Kind::StringValue("%REQ(X-REQUEST-ID)%".into())));
    }

    #[test]
    fn disabled_logging_yields_nothing() {
        let config = AccessLogConfig { enabled: false, ..Default::default() };
        assert!(access_logs(&config).unwrap().is_empty());
    }

    #[test]
    fn custom_format_replaces_default() {
        let custom = serde_json::json!({
            "code": "%RESPONSE_CODE%",
            "tags": ["mesh", 1],
            "nested": { "sampled": true, "none": null }
        });
        let config = AccessLogConfig {
            json_format: custom.as_object().cloned(),
            path: "/var/log/envoy.log".into(),
            ..Default::default()
        };

        let file_log = decode(&access_logs(&config).unwrap()[0]);
        assert_eq!(file_log.path, "/var/log/envoy.log");
        let format = json_format(&file_log);
        assert_eq!(format.fields.len(), 3);
        match &format.fields["tags"].kind {
            Some(Kind::ListValue(list)) => {
                assert_eq!(list.values[1].kind, Some(Kind::NumberValue(1.0)));
            }
            other => panic!("unexpected tags {:?}", other),
        }
        match &format.fields["nested"].kind {
            Some(Kind::StructValue(nested)) => {
                assert_eq!(nested.fields["sampled"].kind, Some(Kind::BoolValue(true)));
                assert_eq!(nested.fields["none"].kind, Some(Kind::NullValue(0)));
            }
            other => panic!("unexpected nested {:?}", other),
        }
    }
}
