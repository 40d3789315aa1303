//! Response normalization: vendor payloads to shared result shapes.
//!
//! Units are fixed across providers: Celsius, km/h, metres, seconds and
//! millimetres. Numbers are rounded to two decimals and absent optional
//! fields are omitted rather than emitted as null.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tools::{Provider, RawResult, Shape, ToolError, ToolResult};

const CELSIUS_KEYS: &[&str] = &["temp_c", "temperature_c", "temp", "temperature", "temperature_2m"];
const FAHRENHEIT_KEYS: &[&str] = &["temp_f", "temperature_f"];
const KELVIN_KEYS: &[&str] = &["temp_k", "temperature_k"];
const CONDITION_KEYS: &[&str] = &["text", "condition", "conditions", "weather", "summary", "description"];

/// Convert a raw provider payload into its shared shape
pub fn normalize(provider: Provider, raw: &RawResult) -> ToolResult<Value> {
    let body = &raw.body;
    let payload = match raw.shape {
        Shape::Observation => observation(body),
        Shape::HourlyForecast => forecast(body, "hourly"),
        Shape::DailyForecast => forecast(body, "daily"),
        Shape::Precipitation => precipitation(body),
        Shape::Alerts => alerts(body),
        Shape::AirQuality => air_quality(body),
        Shape::AirQualityForecast => air_quality_forecast(body),
        Shape::LifeIndices => life_indices(body),
        Shape::Storms => storms(body),
        Shape::StormPath => storm_path(body),
        Shape::Tides => tides(body),
        Shape::SolarRadiation => solar_radiation(body),
        Shape::Astronomy => astronomy(body),
        Shape::Places => places(body),
        Shape::Route => route(body),
        Shape::Memories => memories(body),
        Shape::MemoryEvents => memory_events(body),
        Shape::SearchHits => search_hits(body),
    }
    .map_err(|e| match e {
        ToolError::Malformed(msg) => ToolError::Malformed(format!("{} {:?}: {}", provider, raw.shape, msg)),
        other => other,
    })?;

    debug!(target: "gateway", provider = %provider, shape = ?raw.shape, "Normalized payload");
    Ok(payload)
}

/// Builder for payload objects that skips absent values
#[derive(Default)]
struct Fields(Map<String, Value>);

impl Fields {
    fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn num(&mut self, key: &str, value: Option<f64>) -> &mut Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), json!(round2(v)));
        }
        self
    }

    fn text(&mut self, key: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), Value::String(v));
        }
        self
    }

    fn build(&mut self) -> Value {
        Value::Object(std::mem::take(&mut self.0))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Numbers may arrive as JSON numbers or numeric strings
fn as_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Non-empty string. Amap sends `[]` for missing text fields.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn first_num(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(as_num))
}

fn first_text(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(as_text))
}

fn celsius(obj: &Value) -> Option<f64> {
    first_num(obj, CELSIUS_KEYS)
        .or_else(|| first_num(obj, FAHRENHEIT_KEYS).map(fahrenheit_to_celsius))
        .or_else(|| first_num(obj, KELVIN_KEYS).map(|k| k - 273.15))
}

fn wind_kmh(obj: &Value, kmh_keys: &[&str]) -> Option<f64> {
    first_num(obj, kmh_keys)
        .or_else(|| first_num(obj, &["wind_speed_ms", "wind_speed_mps"]).map(|ms| ms * 3.6))
        .or_else(|| first_num(obj, &["wind_speed_mph", "wind_mph"]).map(|mph| mph * 1.609344))
}

fn precipitation_mm(obj: &Value) -> Option<f64> {
    first_num(obj, &["precip", "precipitation", "precipitation_mm", "precip_mm"])
        .or_else(|| first_num(obj, &["precip_in"]).map(|inch| inch * 25.4))
}

/// RFC 3339 when the timestamp parses, otherwise the vendor string as-is
fn timestamp(obj: &Value, keys: &[&str]) -> Option<String> {
    let raw = first_text(obj, keys)?;
    let parsed = DateTime::parse_from_rfc3339(&raw)
        .or_else(|_| DateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M%:z"));
    if let Ok(dt) = parsed {
        return Some(dt.to_rfc3339());
    }
    // v1 APIs send minute-precision UTC such as "2023-05-17T03:00Z"
    let utc = raw
        .strip_suffix('Z')
        .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M").ok());
    Some(utc.map(|t| t.and_utc().to_rfc3339()).unwrap_or(raw))
}

fn require_array<'a>(value: Option<&'a Value>, what: &str) -> ToolResult<&'a Vec<Value>> {
    value
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Malformed(format!("missing {} list", what)))
}

/// WMO weather interpretation codes
fn wmo_description(code: i64) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "foggy",
        51 | 53 | 55 => "drizzle",
        61 | 63 | 65 => "rain",
        71 | 73 | 75 => "snow",
        77 => "snow grains",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "unknown",
    }
}

fn condition(obj: &Value) -> Option<String> {
    first_text(obj, CONDITION_KEYS).or_else(|| {
        first_num(obj, &["weather_code", "weathercode"])
            .map(|c| wmo_description(c as i64).to_string())
    })
}

fn observation(body: &Value) -> ToolResult<Value> {
    let obj = body
        .get("now")
        .or_else(|| body.get("current"))
        .unwrap_or(body);
    if !obj.is_object() {
        return Err(ToolError::Malformed("observation is not an object".to_string()));
    }

    let temperature =
        celsius(obj).ok_or_else(|| ToolError::Malformed("no temperature field".to_string()))?;
    let condition =
        condition(obj).ok_or_else(|| ToolError::Malformed("no condition field".to_string()))?;

    let feels_like = first_num(obj, &["feelsLike", "feels_like", "feels_like_c", "apparent_temperature"])
        .or_else(|| first_num(obj, &["feels_like_f"]).map(fahrenheit_to_celsius));
    // QWeather reports visibility in km
    let visibility_m = first_num(obj, &["vis", "visibility_km"])
        .map(|km| km * 1000.0)
        .or_else(|| first_num(obj, &["visibility", "visibility_m"]));

    Ok(Fields::default()
        .num("temperature", Some(temperature))
        .set("unit", "C")
        .set("condition", condition)
        .num("feels_like", feels_like)
        .num("humidity", first_num(obj, &["humidity", "relative_humidity_2m"]))
        .num(
            "wind_speed_kmh",
            wind_kmh(obj, &["windSpeed", "wind_speed_kmh", "wind_speed", "wind_speed_10m"]),
        )
        .text("wind_direction", first_text(obj, &["windDir", "wind_direction", "wind_dir"]))
        .num("precipitation_mm", precipitation_mm(obj))
        .num("pressure_hpa", first_num(obj, &["pressure", "pressure_hpa", "surface_pressure"]))
        .num("visibility_m", visibility_m)
        .text("observed_at", timestamp(obj, &["obsTime", "observed_at", "time"]))
        .build())
}

fn forecast(body: &Value, interval: &str) -> ToolResult<Value> {
    let list = match body {
        Value::Array(_) => Some(body),
        _ => body.get(interval),
    };
    let entries: Vec<Value> = require_array(list, interval)?
        .iter()
        .map(|item| {
            if interval == "hourly" {
                hourly_entry(item)
            } else {
                daily_entry(item)
            }
        })
        .collect();

    Ok(json!({
        "interval": interval,
        "unit": "C",
        "entries": entries,
    }))
}

fn hourly_entry(item: &Value) -> Value {
    Fields::default()
        .text("time", timestamp(item, &["fxTime", "time"]))
        .num("temperature", celsius(item))
        .text("condition", condition(item))
        .num("precipitation_mm", precipitation_mm(item))
        .num(
            "precipitation_probability",
            first_num(item, &["pop", "precipitation_probability"]),
        )
        .num("humidity", first_num(item, &["humidity", "relative_humidity_2m"]))
        .num("wind_speed_kmh", wind_kmh(item, &["windSpeed", "wind_speed_kmh", "wind_speed_10m"]))
        .text("wind_direction", first_text(item, &["windDir", "wind_direction"]))
        .build()
}

fn daily_entry(item: &Value) -> Value {
    Fields::default()
        .text("date", first_text(item, &["fxDate", "date"]))
        .num(
            "temp_max",
            first_num(item, &["tempMax", "temp_max", "temperature_2m_max"]),
        )
        .num(
            "temp_min",
            first_num(item, &["tempMin", "temp_min", "temperature_2m_min"]),
        )
        .text("condition", first_text(item, &["textDay", "condition", "text"]))
        .text("condition_night", first_text(item, &["textNight", "condition_night"]))
        .num("precipitation_mm", precipitation_mm(item))
        .num("humidity", first_num(item, &["humidity"]))
        .num(
            "wind_speed_kmh",
            wind_kmh(item, &["windSpeedDay", "wind_speed_kmh", "wind_speed_10m_max"]),
        )
        .num("uv_index", first_num(item, &["uvIndex", "uv_index"]))
        .text("sunrise", first_text(item, &["sunrise"]))
        .text("sunset", first_text(item, &["sunset"]))
        .build()
}

fn precipitation(body: &Value) -> ToolResult<Value> {
    let entries: Vec<Value> = require_array(body.get("minutely"), "minutely")?
        .iter()
        .map(|item| {
            Fields::default()
                .text("time", timestamp(item, &["fxTime", "time"]))
                .num("precipitation_mm", precipitation_mm(item))
                .text("kind", first_text(item, &["type"]))
                .build()
        })
        .collect();

    Ok(Fields::default()
        .text("summary", first_text(body, &["summary"]))
        .text("updated_at", timestamp(body, &["updateTime"]))
        .set("entries", entries)
        .build())
}

fn alerts(body: &Value) -> ToolResult<Value> {
    let list = body.get("warning").or_else(|| body.get("alerts"));
    let alerts: Vec<Value> = require_array(list, "warning")?
        .iter()
        .map(|w| {
            Fields::default()
                .set(
                    "title",
                    first_text(w, &["title", "headline"]).unwrap_or_else(|| "Weather warning".into()),
                )
                .text("severity", first_text(w, &["severity", "level"]))
                .text("kind", first_text(w, &["typeName", "type", "event"]))
                .text("text", first_text(w, &["text", "description"]))
                .text("sender", first_text(w, &["sender"]))
                .text("start", timestamp(w, &["startTime", "start"]))
                .text("end", timestamp(w, &["endTime", "end"]))
                .build()
        })
        .collect();
    Ok(json!({ "alerts": alerts }))
}

/// Prefer the first index (the local standard) when several are reported
fn first_index(obj: &Value) -> Option<&Value> {
    obj.get("indexes")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
}

fn primary_pollutant(index: &Value) -> Option<String> {
    index
        .get("primaryPollutant")
        .and_then(|p| p.get("name").and_then(as_text).or_else(|| as_text(p)))
        .or_else(|| first_text(index, &["primary", "primary_pollutant"]))
}

fn air_quality(body: &Value) -> ToolResult<Value> {
    let index = first_index(body)
        .or_else(|| body.get("now"))
        .unwrap_or(body);

    let aqi = first_num(index, &["aqi", "aqiDisplay"])
        .ok_or_else(|| ToolError::Malformed("no aqi field".to_string()))?;

    Ok(Fields::default()
        .num("aqi", Some(aqi))
        .text("category", first_text(index, &["category", "level"]))
        .text("primary_pollutant", primary_pollutant(index))
        .build())
}

fn air_quality_forecast(body: &Value) -> ToolResult<Value> {
    let (interval, list, time_key) = if body.get("hours").is_some() {
        ("hourly", "hours", "forecastTime")
    } else {
        ("daily", "days", "forecastStartTime")
    };

    let entries: Vec<Value> = require_array(body.get(list), list)?
        .iter()
        .map(|item| {
            let index = first_index(item);
            Fields::default()
                .text("time", timestamp(item, &[time_key]))
                .num("aqi", index.and_then(|i| first_num(i, &["aqi", "aqiDisplay"])))
                .text("category", index.and_then(|i| first_text(i, &["category"])))
                .text("primary_pollutant", index.and_then(primary_pollutant))
                .build()
        })
        .collect();

    Ok(json!({ "interval": interval, "entries": entries }))
}

fn life_indices(body: &Value) -> ToolResult<Value> {
    let indices: Vec<Value> = require_array(body.get("daily"), "daily")?
        .iter()
        .filter_map(|item| {
            let name = first_text(item, &["name"])?;
            Some(
                Fields::default()
                    .text("date", first_text(item, &["date"]))
                    .text("type", first_text(item, &["type"]))
                    .set("name", name)
                    .num("level", first_num(item, &["level"]))
                    .text("category", first_text(item, &["category"]))
                    .text("advice", first_text(item, &["text"]))
                    .build(),
            )
        })
        .collect();
    Ok(json!({ "indices": indices }))
}

/// QWeather flags activity as "1"/"0"
fn flag(obj: &Value, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        other => as_num(other).map(|n| n != 0.0),
    }
}

fn storms(body: &Value) -> ToolResult<Value> {
    let storms: Vec<Value> = require_array(body.get("storm"), "storm")?
        .iter()
        .filter_map(|s| {
            let id = first_text(s, &["id"])?;
            Some(
                Fields::default()
                    .set("id", id)
                    .text("name", first_text(s, &["name"]))
                    .text("basin", first_text(s, &["basin"]))
                    .num("year", first_num(s, &["year"]))
                    .set("active", flag(s, "isActive").unwrap_or(false))
                    .build(),
            )
        })
        .collect();
    Ok(json!({ "storms": storms }))
}

fn storm_path(body: &Value) -> ToolResult<Value> {
    let (kind, list) = match body.get("track") {
        Some(track) => ("track", track),
        None => ("forecast", body.get("forecast").unwrap_or(&Value::Null)),
    };

    let points: Vec<Value> = require_array(Some(list), kind)?
        .iter()
        .filter_map(|p| {
            let lat = first_num(p, &["lat"])?;
            let lon = first_num(p, &["lon"])?;
            Some(
                Fields::default()
                    .text("time", timestamp(p, &["time", "fxTime"]))
                    .num("latitude", Some(lat))
                    .num("longitude", Some(lon))
                    .text("category", first_text(p, &["type"]))
                    .num("pressure_hpa", first_num(p, &["pressure"]))
                    // Storm wind speeds are reported in m/s
                    .num("wind_speed_kmh", first_num(p, &["windSpeed"]).map(|ms| ms * 3.6))
                    .text("move_direction", first_text(p, &["moveDir"]))
                    .num("move_speed_kmh", first_num(p, &["moveSpeed"]))
                    .build(),
            )
        })
        .collect();

    let mut fields = Fields::default();
    fields.set("kind", kind);
    if let Some(active) = flag(body, "isActive") {
        fields.set("active", active);
    }
    Ok(fields
        .text("updated_at", timestamp(body, &["updateTime"]))
        .set("points", points)
        .build())
}

fn tides(body: &Value) -> ToolResult<Value> {
    let tides: Vec<Value> = require_array(body.get("tideTable"), "tideTable")?
        .iter()
        .map(|t| {
            let kind = match first_text(t, &["type"]).as_deref() {
                Some("H") => Some("high".to_string()),
                Some("L") => Some("low".to_string()),
                other => other.map(str::to_string),
            };
            Fields::default()
                .text("time", timestamp(t, &["fxTime"]))
                .num("height_m", first_num(t, &["height"]))
                .text("kind", kind)
                .build()
        })
        .collect();
    Ok(json!({ "tides": tides }))
}

/// `{"value": .., "unit": ..}` wrapper used by the v1 APIs
fn measured(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(|m| m.get("value")).and_then(as_num)
}

fn solar_radiation(body: &Value) -> ToolResult<Value> {
    let entries: Vec<Value> = require_array(body.get("forecasts"), "forecasts")?
        .iter()
        .map(|f| {
            let angle = f.get("solarAngle").unwrap_or(&Value::Null);
            Fields::default()
                .text("time", timestamp(f, &["forecastTime"]))
                .num("ghi_wm2", measured(f, "ghi"))
                .num("dni_wm2", measured(f, "dni"))
                .num("dhi_wm2", measured(f, "dhi"))
                .num("elevation_deg", first_num(angle, &["elevation"]))
                .num("azimuth_deg", first_num(angle, &["azimuth"]))
                .build()
        })
        .collect();
    Ok(json!({ "unit": "W/m2", "entries": entries }))
}

fn astronomy(body: &Value) -> ToolResult<Value> {
    let sun = body
        .get("sun")
        .filter(|s| s.is_object())
        .ok_or_else(|| ToolError::Malformed("no sun times".to_string()))?;
    let moon = body.get("moon").unwrap_or(&Value::Null);
    let solar = body.get("solar").unwrap_or(&Value::Null);

    // Phases are hourly; report the one nearest midday
    let phase = moon
        .get("moonPhase")
        .and_then(Value::as_array)
        .and_then(|phases| phases.get(12).or_else(|| phases.first()));

    Ok(Fields::default()
        .text("date", first_text(body, &["date"]))
        .text("sunrise", timestamp(sun, &["sunrise"]))
        .text("sunset", timestamp(sun, &["sunset"]))
        .text("moonrise", timestamp(moon, &["moonrise"]))
        .text("moonset", timestamp(moon, &["moonset"]))
        .text("moon_phase", phase.and_then(|p| first_text(p, &["name"])))
        .num("moon_illumination", phase.and_then(|p| first_num(p, &["illumination"])))
        .num("solar_elevation_deg", first_num(solar, &["solarElevationAngle"]))
        .num("solar_azimuth_deg", first_num(solar, &["solarAzimuthAngle"]))
        .build())
}

/// Amap coordinates are "lon,lat" strings
fn lon_lat(value: Option<&Value>) -> Option<(f64, f64)> {
    let s = value.and_then(as_text)?;
    let (lon, lat) = s.split_once(',')?;
    Some((lon.trim().parse().ok()?, lat.trim().parse().ok()?))
}

fn place(name: String, (lon, lat): (f64, f64), item: &Value) -> Value {
    Fields::default()
        .set("name", name)
        .text("address", first_text(item, &["address", "formatted_address"]))
        .num("latitude", Some(lat))
        .num("longitude", Some(lon))
        .text("region_code", first_text(item, &["adcode", "region_code"]))
        .num("distance_m", first_num(item, &["distance"]))
        .text("kind", first_text(item, &["type", "level", "kind"]))
        .text("id", first_text(item, &["id"]))
        .build()
}

fn places(body: &Value) -> ToolResult<Value> {
    let mut out = Vec::new();

    if let Some(regeo) = body.get("regeocode") {
        // Reverse geocode: one place at the queried point
        let name = first_text(regeo, &["formatted_address"])
            .ok_or_else(|| ToolError::Malformed("regeocode without address".to_string()))?;
        let point = lon_lat(body.get("location"))
            .ok_or_else(|| ToolError::Malformed("regeocode without location".to_string()))?;
        let region_code = regeo
            .get("addressComponent")
            .and_then(|c| first_text(c, &["adcode"]));
        out.push(
            Fields::default()
                .set("name", name)
                .num("latitude", Some(point.1))
                .num("longitude", Some(point.0))
                .text("region_code", region_code)
                .build(),
        );
    } else if let Some(list) = body.get("geocodes").or_else(|| body.get("pois")) {
        let list = require_array(Some(list), "places")?;
        for item in list {
            let Some(point) = lon_lat(item.get("location")) else {
                continue;
            };
            if let Some(name) = first_text(item, &["name", "formatted_address"]) {
                out.push(place(name, point, item));
            }
        }
    } else if body.get("rectangle").is_some() || body.get("province").is_some() {
        // IP location: centre of the city bounding box
        let name = [first_text(body, &["province"]), first_text(body, &["city"])]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        let centre = first_text(body, &["rectangle"]).and_then(|r| {
            let (a, b) = r.split_once(';')?;
            let (lon1, lat1) = lon_lat(Some(&Value::String(a.to_string())))?;
            let (lon2, lat2) = lon_lat(Some(&Value::String(b.to_string())))?;
            Some(((lon1 + lon2) / 2.0, (lat1 + lat2) / 2.0))
        });
        // Foreign and private addresses come back without a region
        if let (false, Some(centre)) = (name.is_empty(), centre) {
            out.push(place(name.join(""), centre, body));
        }
    } else {
        return Err(ToolError::Malformed("unrecognised place payload".to_string()));
    }

    Ok(json!({ "places": out }))
}

fn route(body: &Value) -> ToolResult<Value> {
    if let Some(transit) = body.pointer("/route/transits/0") {
        return transit_route(transit);
    }
    let path = body
        .pointer("/route/paths/0")
        .or_else(|| body.pointer("/data/paths/0"))
        .ok_or_else(|| ToolError::Malformed("no route path".to_string()))?;

    let distance = first_num(path, &["distance"])
        .ok_or_else(|| ToolError::Malformed("route without distance".to_string()))?;
    let duration = first_num(path, &["duration"])
        .ok_or_else(|| ToolError::Malformed("route without duration".to_string()))?;

    let steps: Vec<Value> = path
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .map(|s| {
                    Fields::default()
                        .set("instruction", first_text(s, &["instruction"]).unwrap_or_default())
                        .text("road", first_text(s, &["road"]))
                        .num("distance_m", Some(first_num(s, &["distance"]).unwrap_or(0.0)))
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Fields::default()
        .set("mode", first_text(body, &["mode"]).unwrap_or_else(|| "driving".into()))
        .num("distance_m", Some(distance))
        .num("duration_s", Some(duration))
        .set("steps", steps)
        .build())
}

/// Public transit plan: each segment is a walk followed by an optional ride
fn transit_route(transit: &Value) -> ToolResult<Value> {
    let distance = first_num(transit, &["distance"])
        .ok_or_else(|| ToolError::Malformed("transit without distance".to_string()))?;
    let duration = first_num(transit, &["duration"])
        .ok_or_else(|| ToolError::Malformed("transit without duration".to_string()))?;

    let mut steps = Vec::new();
    for segment in transit
        .get("segments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(walk) = segment.get("walking").and_then(|w| first_num(w, &["distance"])) {
            if walk > 0.0 {
                steps.push(
                    Fields::default()
                        .set("instruction", format!("Walk {} m", walk.round()))
                        .num("distance_m", Some(walk))
                        .build(),
                );
            }
        }
        if let Some(line) = segment.pointer("/bus/buslines/0") {
            let name = first_text(line, &["name"]).unwrap_or_else(|| "transit line".into());
            let from = line.get("departure_stop").and_then(|s| first_text(s, &["name"]));
            let to = line.get("arrival_stop").and_then(|s| first_text(s, &["name"]));
            let instruction = match (from, to) {
                (Some(from), Some(to)) => format!("Take {} from {} to {}", name, from, to),
                _ => format!("Take {}", name),
            };
            steps.push(
                Fields::default()
                    .set("instruction", instruction)
                    .num("distance_m", Some(first_num(line, &["distance"]).unwrap_or(0.0)))
                    .build(),
            );
        }
    }

    Ok(Fields::default()
        .set("mode", "transit")
        .num("distance_m", Some(distance))
        .num("duration_s", Some(duration))
        .num("walking_distance_m", first_num(transit, &["walking_distance"]))
        .num("cost", first_num(transit, &["cost"]))
        .set("steps", steps)
        .build())
}

/// Mem0 answers with a bare list or wraps it in `results`
fn result_list<'a>(body: &'a Value, what: &str) -> ToolResult<&'a Vec<Value>> {
    match body {
        Value::Array(list) => Ok(list),
        _ => require_array(body.get("results").or_else(|| body.get("memories")), what),
    }
}

fn memories(body: &Value) -> ToolResult<Value> {
    let memories: Vec<Value> = result_list(body, "memories")?
        .iter()
        .filter_map(|m| {
            let id = first_text(m, &["id"])?;
            let memory = first_text(m, &["memory", "text"])?;
            Some(
                Fields::default()
                    .set("id", id)
                    .set("memory", memory)
                    .num("score", first_num(m, &["score"]))
                    .text("created_at", timestamp(m, &["created_at"]))
                    .build(),
            )
        })
        .collect();
    Ok(json!({ "memories": memories }))
}

fn memory_events(body: &Value) -> ToolResult<Value> {
    // Asynchronous adds are acknowledged without events
    if body.is_object() && body.get("results").is_none() {
        return Ok(Fields::default()
            .set("events", Vec::<Value>::new())
            .text("status", first_text(body, &["status"]))
            .text("message", first_text(body, &["message"]))
            .build());
    }

    let events: Vec<Value> = result_list(body, "events")?
        .iter()
        .map(|e| {
            Fields::default()
                .text("id", first_text(e, &["id"]))
                .set("event", first_text(e, &["event"]).unwrap_or_else(|| "ADD".into()))
                .text(
                    "memory",
                    e.get("data")
                        .and_then(|d| first_text(d, &["memory"]))
                        .or_else(|| first_text(e, &["memory"])),
                )
                .build()
        })
        .collect();
    Ok(json!({ "events": events }))
}

fn search_hits(body: &Value) -> ToolResult<Value> {
    let results: Vec<Value> = require_array(body.get("results"), "results")?
        .iter()
        .filter_map(|r| {
            let url = first_text(r, &["url"])?;
            Some(
                Fields::default()
                    .set("title", first_text(r, &["title"]).unwrap_or_else(|| url.clone()))
                    .set("url", url)
                    .set("snippet", first_text(r, &["content", "snippet"]).unwrap_or_default())
                    .num("score", first_num(r, &["score"]))
                    .build(),
            )
        })
        .collect();

    Ok(Fields::default()
        .text("answer", first_text(body, &["answer"]))
        .set("results", results)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(provider: Provider, shape: Shape, body: Value) -> RawResult {
        RawResult::new(provider, shape, body)
    }

    fn observe(body: Value) -> Value {
        normalize(Provider::Weather, &raw(Provider::Weather, Shape::Observation, body)).unwrap()
    }

    #[test]
    fn test_fahrenheit_and_celsius_agree() {
        let c = observe(json!({"temp_c": 21.5, "condition": "Clear"}));
        let f = observe(json!({"temp_f": 70.7, "condition": "Clear"}));
        let k = observe(json!({"temp_k": "294.65", "condition": "Clear"}));
        assert_eq!(c["temperature"], f["temperature"]);
        assert_eq!(c["temperature"], k["temperature"]);
        assert_eq!(c, json!({"temperature": 21.5, "unit": "C", "condition": "Clear"}));
    }

    #[test]
    fn test_qweather_observation() {
        let payload = observe(json!({
            "code": "200",
            "now": {
                "obsTime": "2020-06-30T21:40+08:00",
                "temp": "24",
                "feelsLike": "26",
                "text": "多云",
                "windDir": "东南风",
                "windSpeed": "3",
                "humidity": "72",
                "precip": "0.0",
                "pressure": "1003",
                "vis": "16"
            }
        }));
        assert_eq!(payload["temperature"], 24.0);
        assert_eq!(payload["feels_like"], 26.0);
        assert_eq!(payload["visibility_m"], 16000.0);
        assert_eq!(payload["wind_direction"], "东南风");
        assert_eq!(payload["observed_at"], "2020-06-30T21:40:00+08:00");
    }

    #[test]
    fn test_open_meteo_observation_uses_wmo_code() {
        let payload = observe(json!({
            "current": {"temperature_2m": 12.346, "weather_code": 3, "wind_speed_10m": 10.0}
        }));
        assert_eq!(payload["temperature"], 12.35);
        assert_eq!(payload["condition"], "overcast");
        assert!(payload.get("humidity").is_none());
    }

    #[test]
    fn test_observation_without_temperature_is_malformed() {
        let err = normalize(
            Provider::Weather,
            &raw(Provider::Weather, Shape::Observation, json!({"condition": "Clear"})),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Malformed(_)));
    }

    #[test]
    fn test_daily_forecast() {
        let payload = normalize(
            Provider::Weather,
            &raw(
                Provider::Weather,
                Shape::DailyForecast,
                json!({"daily": [{"fxDate": "2024-05-01", "tempMax": "28", "tempMin": "16", "textDay": "晴"}]}),
            ),
        )
        .unwrap();
        assert_eq!(payload["interval"], "daily");
        assert_eq!(payload["entries"][0]["temp_max"], 28.0);
        assert_eq!(payload["entries"][0]["condition"], "晴");
    }

    #[test]
    fn test_places_from_pois_skip_missing_fields() {
        let payload = normalize(
            Provider::Geo,
            &raw(
                Provider::Geo,
                Shape::Places,
                json!({"status": "1", "pois": [
                    {"id": "B0FFG", "name": "Cafe", "address": [], "location": "116.41,39.92", "distance": "120", "adcode": "110101"},
                    {"name": "Nowhere", "location": []}
                ]}),
            ),
        )
        .unwrap();
        let places = payload["places"].as_array().unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0]["latitude"], 39.92);
        assert_eq!(places[0]["distance_m"], 120.0);
        assert!(places[0].get("address").is_none());
    }

    #[test]
    fn test_ip_location_centre() {
        let payload = normalize(
            Provider::Geo,
            &raw(
                Provider::Geo,
                Shape::Places,
                json!({"status": "1", "province": "北京市", "city": "北京市", "adcode": "110000",
                       "rectangle": "116.0,39.6;117.0,40.2"}),
            ),
        )
        .unwrap();
        assert_eq!(payload["places"][0]["longitude"], 116.5);
        assert_eq!(payload["places"][0]["latitude"], 39.9);

        let foreign = normalize(
            Provider::Geo,
            &raw(
                Provider::Geo,
                Shape::Places,
                json!({"status": "1", "province": [], "city": [], "rectangle": []}),
            ),
        )
        .unwrap();
        assert_eq!(foreign, json!({"places": []}));
    }

    #[test]
    fn test_route_units() {
        let payload = normalize(
            Provider::Geo,
            &raw(
                Provider::Geo,
                Shape::Route,
                json!({"mode": "walking", "route": {"paths": [{"distance": "1520", "duration": "1260",
                    "steps": [{"instruction": "向北步行100米", "road": [], "distance": "100"}]}]}}),
            ),
        )
        .unwrap();
        assert_eq!(
            payload,
            json!({"mode": "walking", "distance_m": 1520.0, "duration_s": 1260.0,
                   "steps": [{"instruction": "向北步行100米", "distance_m": 100.0}]})
        );
    }

    fn weather(shape: Shape, body: Value) -> Value {
        normalize(Provider::Weather, &raw(Provider::Weather, shape, body)).unwrap()
    }

    #[test]
    fn test_minutely_precipitation() {
        let payload = weather(
            Shape::Precipitation,
            json!({"code": "200", "summary": "Rain in 15 minutes", "updateTime": "2021-12-16T18:55+08:00",
                   "minutely": [{"fxTime": "2021-12-16T18:55+08:00", "precip": "0.15", "type": "rain"}]}),
        );
        assert_eq!(payload["summary"], "Rain in 15 minutes");
        assert_eq!(
            payload["entries"],
            json!([{"time": "2021-12-16T18:55:00+08:00", "precipitation_mm": 0.15, "kind": "rain"}])
        );
    }

    #[test]
    fn test_air_quality_forecast_intervals() {
        let hourly = weather(
            Shape::AirQualityForecast,
            json!({"hours": [{"forecastTime": "2023-05-17T03:00Z",
                              "indexes": [{"aqi": 46, "category": "Excellent", "primaryPollutant": null}]}]}),
        );
        assert_eq!(hourly["interval"], "hourly");
        assert_eq!(
            hourly["entries"][0],
            json!({"time": "2023-05-17T03:00:00+00:00", "aqi": 46.0, "category": "Excellent"})
        );

        let daily = weather(
            Shape::AirQualityForecast,
            json!({"days": [{"forecastStartTime": "2023-05-17T00:00+08:00",
                             "indexes": [{"aqi": "88", "primaryPollutant": {"name": "PM 2.5"}}]}]}),
        );
        assert_eq!(daily["interval"], "daily");
        assert_eq!(daily["entries"][0]["primary_pollutant"], "PM 2.5");
    }

    #[test]
    fn test_life_indices() {
        let payload = weather(
            Shape::LifeIndices,
            json!({"daily": [{"date": "2024-06-15", "type": "1", "name": "Sport", "level": "2",
                              "category": "Fair", "text": "Prefer indoor exercise"}]}),
        );
        assert_eq!(
            payload,
            json!({"indices": [{"date": "2024-06-15", "type": "1", "name": "Sport", "level": 2.0,
                                "category": "Fair", "advice": "Prefer indoor exercise"}]})
        );
    }

    #[test]
    fn test_storm_list_and_track() {
        let list = weather(
            Shape::Storms,
            json!({"storm": [{"id": "NP_2305", "name": "Doksuri", "basin": "NP", "year": "2023", "isActive": "0"}]}),
        );
        assert_eq!(list["storms"][0]["active"], false);
        assert_eq!(list["storms"][0]["year"], 2023.0);

        let track = weather(
            Shape::StormPath,
            json!({"isActive": "1", "track": [{"time": "2023-07-28T08:00+08:00", "lat": "24.5", "lon": "119.2",
                   "type": "STS", "pressure": "980", "windSpeed": "25", "moveDir": "NNW", "moveSpeed": "15"}]}),
        );
        assert_eq!(track["kind"], "track");
        assert_eq!(track["active"], true);
        assert_eq!(track["points"][0]["wind_speed_kmh"], 90.0);
        assert_eq!(track["points"][0]["move_speed_kmh"], 15.0);

        let forecast = weather(
            Shape::StormPath,
            json!({"forecast": [{"fxTime": "2023-07-29T08:00+08:00", "lat": "26", "lon": "118"}]}),
        );
        assert_eq!(forecast["kind"], "forecast");
        assert!(forecast.get("active").is_none());
    }

    #[test]
    fn test_tides_and_solar_radiation() {
        let tides = weather(
            Shape::Tides,
            json!({"tideTable": [{"fxTime": "2023-06-01T03:12+08:00", "height": "4.12", "type": "H"},
                                 {"fxTime": "2023-06-01T09:30+08:00", "height": "0.8", "type": "L"}]}),
        );
        assert_eq!(tides["tides"][0]["kind"], "high");
        assert_eq!(tides["tides"][1]["height_m"], 0.8);

        let solar = weather(
            Shape::SolarRadiation,
            json!({"forecasts": [{"forecastTime": "2024-06-15T04:00Z",
                                  "ghi": {"value": 612.4, "unit": "W/m2"}, "dni": {"value": 700},
                                  "dhi": {"value": 98.25}, "solarAngle": {"azimuth": 120.5, "elevation": 40.1}}]}),
        );
        assert_eq!(solar["unit"], "W/m2");
        assert_eq!(solar["entries"][0]["ghi_wm2"], 612.4);
        assert_eq!(solar["entries"][0]["elevation_deg"], 40.1);
    }

    #[test]
    fn test_astronomy_picks_midday_phase() {
        let phases: Vec<Value> = (0..24)
            .map(|h| json!({"name": format!("phase {}", h), "illumination": h}))
            .collect();
        let payload = weather(
            Shape::Astronomy,
            json!({"date": "20240615",
                   "sun": {"sunrise": "2024-06-15T04:45+08:00", "sunset": "2024-06-15T19:45+08:00"},
                   "moon": {"moonrise": "2024-06-15T13:10+08:00", "moonPhase": phases},
                   "solar": null}),
        );
        assert_eq!(payload["moon_phase"], "phase 12");
        assert_eq!(payload["moon_illumination"], 12.0);
        assert_eq!(payload["sunrise"], "2024-06-15T04:45:00+08:00");
        assert!(payload.get("solar_elevation_deg").is_none());

        let err = normalize(
            Provider::Weather,
            &raw(Provider::Weather, Shape::Astronomy, json!({"moon": {}})),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Malformed(_)));
    }

    #[test]
    fn test_transit_route_steps() {
        let payload = normalize(
            Provider::Geo,
            &raw(
                Provider::Geo,
                Shape::Route,
                json!({"mode": "transit", "route": {"transits": [{
                    "distance": "15000", "duration": "2700", "walking_distance": "600", "cost": "4.0",
                    "segments": [{
                        "walking": {"distance": "300"},
                        "bus": {"buslines": [{"name": "Line 1", "distance": "14000",
                                "departure_stop": {"name": "Tiananmen East"},
                                "arrival_stop": {"name": "Sihui"}}]}
                    }]
                }]}}),
            ),
        )
        .unwrap();
        assert_eq!(payload["mode"], "transit");
        assert_eq!(payload["walking_distance_m"], 600.0);
        assert_eq!(
            payload["steps"],
            json!([
                {"instruction": "Walk 300 m", "distance_m": 300.0},
                {"instruction": "Take Line 1 from Tiananmen East to Sihui", "distance_m": 14000.0}
            ])
        );
    }

    #[test]
    fn test_memories_and_events() {
        let payload = normalize(
            Provider::Memory,
            &raw(
                Provider::Memory,
                Shape::Memories,
                json!({"results": [{"id": "m1", "memory": "Likes tea", "score": 0.8765}]}),
            ),
        )
        .unwrap();
        assert_eq!(payload["memories"][0]["score"], 0.88);

        let queued = normalize(
            Provider::Memory,
            &raw(
                Provider::Memory,
                Shape::MemoryEvents,
                json!({"message": "queued", "status": "PENDING"}),
            ),
        )
        .unwrap();
        assert_eq!(queued["status"], "PENDING");
        assert_eq!(queued["events"], json!([]));
    }

    #[test]
    fn test_search_hits() {
        let payload = normalize(
            Provider::Search,
            &raw(
                Provider::Search,
                Shape::SearchHits,
                json!({"answer": "Tokio", "results": [
                    {"title": "Tokio", "url": "https://tokio.rs", "content": "An async runtime", "score": 0.98}
                ]}),
            ),
        )
        .unwrap();
        assert_eq!(payload["answer"], "Tokio");
        assert_eq!(payload["results"][0]["snippet"], "An async runtime");

        let err = normalize(
            Provider::Search,
            &raw(Provider::Search, Shape::SearchHits, json!("oops")),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Malformed(_)));
    }
}
