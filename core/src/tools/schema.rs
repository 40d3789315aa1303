//! Typed parameter descriptors and the generic routine that checks tool
//! arguments against them.

use std::net::Ipv4Addr;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use super::error::{ToolError, ToolResult};

/// Closed set of parameter types a tool may declare
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String {
        /// Reject empty / whitespace-only strings
        non_empty: bool,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    /// One of a fixed set of strings
    Enum(Vec<String>),
    /// One of a fixed set of integers (e.g. forecast horizons)
    IntegerChoice(Vec<i64>),
    /// "lon,lat" pair with range checks
    Coordinates,
    /// Dotted-quad IPv4 address
    Ipv4,
    /// Calendar date written as yyyyMMdd
    Date,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub kind: ParamType,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    fn new(name: &str, description: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, description, ParamType::String { non_empty: true })
    }

    pub fn integer(name: &str, description: &str, min: Option<i64>, max: Option<i64>) -> Self {
        Self::new(name, description, ParamType::Integer { min, max })
    }

    pub fn number(name: &str, description: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(name, description, ParamType::Number { min, max })
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, description, ParamType::Boolean)
    }

    pub fn one_of(name: &str, description: &str, values: &[&str]) -> Self {
        Self::new(
            name,
            description,
            ParamType::Enum(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn integer_choice(name: &str, description: &str, values: &[i64]) -> Self {
        Self::new(name, description, ParamType::IntegerChoice(values.to_vec()))
    }

    pub fn coordinates(name: &str, description: &str) -> Self {
        Self::new(name, description, ParamType::Coordinates)
    }

    pub fn ipv4(name: &str, description: &str) -> Self {
        Self::new(name, description, ParamType::Ipv4)
    }

    pub fn date(name: &str, description: &str) -> Self {
        Self::new(name, description, ParamType::Date)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Optional parameter that takes `value` when omitted
    pub fn with_default(mut self, value: Value) -> Self {
        self.required = false;
        self.default = Some(value);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            ParamType::String { .. } => json!({ "type": "string" }),
            ParamType::Integer { min, max } => {
                let mut s = json!({ "type": "integer" });
                if let Some(min) = min {
                    s["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    s["maximum"] = json!(max);
                }
                s
            }
            ParamType::Number { min, max } => {
                let mut s = json!({ "type": "number" });
                if let Some(min) = min {
                    s["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    s["maximum"] = json!(max);
                }
                s
            }
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Enum(values) => json!({ "type": "string", "enum": values }),
            ParamType::IntegerChoice(values) => json!({ "type": "integer", "enum": values }),
            ParamType::Coordinates => json!({
                "type": "string",
                "pattern": r"^-?\d+(\.\d+)?,-?\d+(\.\d+)?$"
            }),
            ParamType::Ipv4 => json!({ "type": "string", "format": "ipv4" }),
            ParamType::Date => json!({ "type": "string", "pattern": r"^\d{8}$" }),
        };
        schema["description"] = json!(self.description);
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }

    fn check(&self, value: &Value) -> ToolResult<Value> {
        let name = &self.name;
        match &self.kind {
            ParamType::String { non_empty } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected a string"))?;
                if *non_empty && s.trim().is_empty() {
                    return Err(invalid(name, "must not be empty"));
                }
                Ok(Value::String(s.trim().to_string()))
            }
            ParamType::Integer { min, max } => {
                let n = as_integer(value).ok_or_else(|| invalid(name, "expected an integer"))?;
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    return Err(invalid(name, &format!("{} is out of range", n)));
                }
                Ok(json!(n))
            }
            ParamType::Number { min, max } => {
                let n = as_number(value).ok_or_else(|| invalid(name, "expected a number"))?;
                if !n.is_finite() || min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    return Err(invalid(name, &format!("{} is out of range", n)));
                }
                Ok(json!(n))
            }
            ParamType::Boolean => match value {
                Value::Bool(b) => Ok(json!(b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(json!(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(json!(false)),
                _ => Err(invalid(name, "expected a boolean")),
            },
            ParamType::Enum(values) => {
                let s = value
                    .as_str()
                    .map(|s| s.trim().to_lowercase())
                    .ok_or_else(|| invalid(name, "expected a string"))?;
                if values.iter().any(|v| *v == s) {
                    Ok(Value::String(s))
                } else {
                    Err(invalid(name, &format!("must be one of {:?}", values)))
                }
            }
            ParamType::IntegerChoice(values) => {
                let n = as_integer(value).ok_or_else(|| invalid(name, "expected an integer"))?;
                if values.contains(&n) {
                    Ok(json!(n))
                } else {
                    Err(invalid(name, &format!("must be one of {:?}", values)))
                }
            }
            ParamType::Coordinates => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected \"lon,lat\""))?;
                let (lon, lat) = parse_coordinates(s)
                    .ok_or_else(|| invalid(name, "expected \"lon,lat\" with valid ranges"))?;
                Ok(Value::String(format!("{},{}", lon, lat)))
            }
            ParamType::Ipv4 => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected an IPv4 address"))?;
                let addr: Ipv4Addr = s
                    .trim()
                    .parse()
                    .map_err(|_| invalid(name, &format!("'{}' is not an IPv4 address", s)))?;
                Ok(Value::String(addr.to_string()))
            }
            ParamType::Date => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected a yyyyMMdd date"))?;
                let date = NaiveDate::parse_from_str(s.trim(), "%Y%m%d")
                    .map_err(|_| invalid(name, &format!("'{}' is not a yyyyMMdd date", s)))?;
                Ok(Value::String(date.format("%Y%m%d").to_string()))
            }
        }
    }
}

fn invalid(name: &str, reason: &str) -> ToolError {
    ToolError::Validation(format!("'{}': {}", name, reason))
}

/// Integers may arrive as JSON numbers or numeric strings
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse "lon,lat", rejecting values outside the WGS84 ranges
pub fn parse_coordinates(s: &str) -> Option<(f64, f64)> {
    let (lon, lat) = s.trim().split_once(',')?;
    let lon: f64 = lon.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    if (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat) {
        Some((lon, lat))
    } else {
        None
    }
}

/// Declared input of a tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    pub params: Vec<ParamSpec>,
}

impl InputSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// JSON Schema rendering used by `tools/list`
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    /// Check `arguments` against the declared parameters. Unknown keys, missing
    /// required keys and type/range mismatches are all `ToolError::Validation`.
    pub fn validate(&self, arguments: &Value) -> ToolResult<ValidatedArgs> {
        let empty = Map::new();
        let given = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ToolError::Validation(
                    "arguments must be a JSON object".to_string(),
                ))
            }
        };

        if let Some(unknown) = given
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(ToolError::Validation(format!(
                "unknown parameter '{}'",
                unknown
            )));
        }

        let mut values = Map::new();
        for param in &self.params {
            match given.get(&param.name) {
                Some(Value::Null) | None => {
                    if param.required {
                        return Err(invalid(&param.name, "is required"));
                    }
                    if let Some(default) = &param.default {
                        values.insert(param.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    values.insert(param.name.clone(), param.check(value)?);
                }
            }
        }
        Ok(ValidatedArgs { values })
    }
}

/// Arguments that passed [`InputSchema::validate`]. Provider clients only
/// accept this type, so unchecked input cannot reach an upstream request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedArgs {
    values: Map<String, Value>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// Required string; validation guarantees presence for required params
    pub fn require_str(&self, name: &str) -> ToolResult<&str> {
        self.str(name)
            .ok_or_else(|| ToolError::Validation(format!("'{}': is required", name)))
    }

    pub fn require_f64(&self, name: &str) -> ToolResult<f64> {
        self.f64(name)
            .ok_or_else(|| ToolError::Validation(format!("'{}': is required", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo_schema() -> InputSchema {
        InputSchema::new(vec![
            ParamSpec::number("lat", "Latitude", Some(-90.0), Some(90.0)),
            ParamSpec::number("lon", "Longitude", Some(-180.0), Some(180.0)),
            ParamSpec::integer("radius", "Radius in metres", Some(0), Some(3000))
                .with_default(json!(1000)),
        ])
    }

    #[test]
    fn test_valid_arguments_with_default() {
        let args = geo_schema()
            .validate(&json!({"lat": 39.92, "lon": "116.41"}))
            .unwrap();
        assert_eq!(args.f64("lat"), Some(39.92));
        assert_eq!(args.f64("lon"), Some(116.41));
        assert_eq!(args.i64("radius"), Some(1000));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = geo_schema()
            .validate(&json!({"lat": 200, "lon": 200}))
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(ref m) if m.contains("lat")));
    }

    #[test]
    fn test_missing_and_unknown_parameters() {
        let schema = geo_schema();
        assert!(matches!(
            schema.validate(&json!({"lat": 1.0})),
            Err(ToolError::Validation(_))
        ));
        assert!(matches!(
            schema.validate(&json!({"lat": 1.0, "lon": 2.0, "zoom": 3})),
            Err(ToolError::Validation(ref m)) if m.contains("zoom")
        ));
        assert!(matches!(
            schema.validate(&json!([1, 2])),
            Err(ToolError::Validation(_))
        ));
    }

    #[test]
    fn test_enum_choice_and_coordinates() {
        let schema = InputSchema::new(vec![
            ParamSpec::one_of("mode", "Travel mode", &["driving", "walking"]),
            ParamSpec::integer_choice("hours", "Horizon", &[24, 72]).optional(),
            ParamSpec::coordinates("location", "lon,lat"),
            ParamSpec::string("note", "Free text").optional(),
        ]);

        let args = schema
            .validate(&json!({"mode": "Driving", "hours": 72, "location": "116.41, 39.92"}))
            .unwrap();
        assert_eq!(args.str("mode"), Some("driving"));
        assert_eq!(args.i64("hours"), Some(72));
        assert_eq!(args.str("location"), Some("116.41,39.92"));
        assert_eq!(args.get("note"), None);

        assert!(schema
            .validate(&json!({"mode": "flying", "location": "1,1"}))
            .is_err());
        assert!(schema
            .validate(&json!({"mode": "walking", "hours": 48, "location": "1,1"}))
            .is_err());
        assert!(schema
            .validate(&json!({"mode": "walking", "location": "39.9,200"}))
            .is_err());
        assert!(schema
            .validate(&json!({"mode": "walking", "location": "1,1", "note": "  "}))
            .is_err());
    }

    #[test]
    fn test_ipv4_and_date_parameters() {
        let schema = InputSchema::new(vec![
            ParamSpec::ipv4("ip", "IPv4 address").optional(),
            ParamSpec::date("date", "Day").optional(),
        ]);

        let args = schema
            .validate(&json!({"ip": " 114.247.50.2 ", "date": "20240615"}))
            .unwrap();
        assert_eq!(args.str("ip"), Some("114.247.50.2"));
        assert_eq!(args.str("date"), Some("20240615"));

        for bad in ["114.247.50", "300.1.1.1", "::1", "localhost"] {
            assert!(
                matches!(
                    schema.validate(&json!({ "ip": bad })),
                    Err(ToolError::Validation(ref m)) if m.contains("'ip'")
                ),
                "{} accepted",
                bad
            );
        }
        assert!(schema.validate(&json!({"date": "2024-06-15"})).is_err());
        assert!(schema.validate(&json!({"date": "20240231"})).is_err());

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["properties"]["ip"]["format"], "ipv4");
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = geo_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["lat"]["type"], "number");
        assert_eq!(schema["properties"]["lat"]["maximum"], 90.0);
        assert_eq!(schema["properties"]["radius"]["default"], 1000);
        assert_eq!(schema["required"], json!(["lat", "lon"]));
    }
}
