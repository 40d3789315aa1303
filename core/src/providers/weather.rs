/// Weather provider backed by the QWeather v7 API
///
/// Places are given as "lon,lat" pairs, numeric QWeather location IDs, or a
/// city name resolved through the GeoAPI city lookup. The credential is sent
/// as the `key` query parameter.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{code_of, require_credential, text_of};
use crate::config::ProviderConfig;
use crate::tools::schema::parse_coordinates;
use crate::tools::{
    InputSchema, ParamSpec, Provider, ProviderClient, RawResult, Shape, ToolDescriptor, ToolError,
    ToolResult, ValidatedArgs,
};
use crate::upstream::{Transport, Upstream, UpstreamRequest};

const HOURLY_HORIZONS: &[i64] = &[24, 72, 168];
const DAILY_HORIZONS: &[i64] = &[3, 7, 10, 15, 30];
const GRID_HOURLY_HORIZONS: &[i64] = &[24, 72];
const GRID_DAILY_HORIZONS: &[i64] = &[3, 7];
const INDEX_HORIZONS: &[i64] = &[1, 3];
/// Sport, car wash, dressing, UV, travel and flu
const INDEX_TYPES: &str = "1,2,3,5,6,9";
const STORM_BASINS: &[&str] = &["np"];

/// Where a query points once `location` or `city` is resolved
#[derive(Debug, Clone, PartialEq)]
struct Target {
    /// Value sent as the `location` query parameter
    query: String,
    point: Option<(f64, f64)>,
}

impl Target {
    fn at(lon: f64, lat: f64) -> Self {
        Self {
            query: format!("{:.2},{:.2}", lon, lat),
            point: Some((lon, lat)),
        }
    }

    /// Coordinates for endpoints that do not take location IDs
    fn point(&self) -> ToolResult<(f64, f64)> {
        self.point.ok_or_else(|| {
            ToolError::Validation(format!(
                "'location': this query needs \"lon,lat\" coordinates, got location ID '{}'",
                self.query
            ))
        })
    }
}

pub struct WeatherClient {
    config: ProviderConfig,
    upstream: Upstream,
}

impl WeatherClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::from_config(Provider::Weather, config),
        }
    }

    /// Client over a caller-supplied transport
    pub fn with_transport(config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::new(Provider::Weather, config, transport),
        }
    }

    fn lang(&self) -> &str {
        self.config.option("lang").unwrap_or("zh-hans")
    }

    fn request(&self, path: &str) -> ToolResult<UpstreamRequest> {
        self.request_url(format!("{}{}", self.config.base_url, path))
    }

    fn request_url(&self, url: String) -> ToolResult<UpstreamRequest> {
        let key = require_credential(&self.config, "QWEATHER_API_KEY")?;
        Ok(UpstreamRequest::get(url)
            .query("key", key.expose())
            .query("lang", self.lang()))
    }

    async fn fetch(&self, request: UpstreamRequest) -> ToolResult<Option<Value>> {
        let resp = self.upstream.send(request).await?;
        let body = resp.json()?;
        check_code(&body)?;
        if code_of(body.get("code")) == Some(204) {
            debug!(target: "weather", "QWeather returned no data for location");
            return Ok(None);
        }
        Ok(Some(body))
    }

    /// Resolve exactly one of `location` / `city`
    async fn target(&self, args: &ValidatedArgs) -> ToolResult<Target> {
        match (args.str("location"), args.str("city")) {
            (Some(raw), None) => parse_location(raw),
            (None, Some(city)) => self.lookup_city(city).await,
            (Some(_), Some(_)) => Err(ToolError::Validation(
                "pass either 'location' or 'city', not both".to_string(),
            )),
            (None, None) => Err(ToolError::Validation(
                "'location': is required unless 'city' is given".to_string(),
            )),
        }
    }

    async fn lookup_city(&self, city: &str) -> ToolResult<Target> {
        let url = match self.config.option("geo_url") {
            Some(url) => url.to_string(),
            None => format!("{}/geo/v2/city/lookup", self.config.base_url),
        };
        let body = self
            .fetch(self.request_url(url)?.query("location", city).query("number", 1))
            .await?;
        let Some(found) = body.as_ref().and_then(|b| b.pointer("/location/0")) else {
            return Err(ToolError::UpstreamRejected(format!(
                "no QWeather location matches city '{}'",
                city
            )));
        };

        let id = text_of(found.get("id"));
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ToolError::Malformed(format!(
                "city lookup for '{}' returned no location ID",
                city
            )));
        }
        let lon = text_of(found.get("lon")).parse::<f64>();
        let lat = text_of(found.get("lat")).parse::<f64>();
        let point = match (lon, lat) {
            (Ok(lon), Ok(lat)) => Some((lon, lat)),
            _ => None,
        };
        debug!(target: "weather", city = %city, id = %id, "Resolved city to location ID");
        Ok(Target {
            query: id.to_string(),
            point,
        })
    }

    async fn current(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let request = if args.bool("grid").unwrap_or(false) {
            let (lon, lat) = target.point()?;
            self.request("/v7/grid-weather/now")?
                .query("location", Target::at(lon, lat).query)
        } else {
            self.request("/v7/weather/now")?.query("location", &target.query)
        };

        let body = self
            .fetch(request)
            .await?
            .ok_or_else(|| no_data(&target.query))?;
        Ok(RawResult::new(Provider::Weather, Shape::Observation, body))
    }

    async fn hourly(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let hours = args.i64("hours").unwrap_or(24);
        let request = if args.bool("grid").unwrap_or(false) {
            let (lon, lat) = target.point()?;
            require_horizon("hours", hours, GRID_HOURLY_HORIZONS)?;
            self.request(&format!("/v7/grid-weather/{}h", hours))?
                .query("location", Target::at(lon, lat).query)
        } else {
            self.request(&format!("/v7/weather/{}h", hours))?
                .query("location", &target.query)
        };

        let body = self
            .fetch(request)
            .await?
            .unwrap_or_else(|| json!({ "hourly": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::HourlyForecast, body))
    }

    async fn daily(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let days = args.i64("days").unwrap_or(3);
        let request = if args.bool("grid").unwrap_or(false) {
            let (lon, lat) = target.point()?;
            require_horizon("days", days, GRID_DAILY_HORIZONS)?;
            self.request(&format!("/v7/grid-weather/{}d", days))?
                .query("location", Target::at(lon, lat).query)
        } else {
            self.request(&format!("/v7/weather/{}d", days))?
                .query("location", &target.query)
        };

        let body = self
            .fetch(request)
            .await?
            .unwrap_or_else(|| json!({ "daily": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::DailyForecast, body))
    }

    async fn minutely(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let (lon, lat) = target.point()?;
        let location = Target::at(lon, lat).query;
        let body = self
            .fetch(self.request("/v7/minutely/5m")?.query("location", &location))
            .await?
            .ok_or_else(|| no_data(&location))?;
        Ok(RawResult::new(Provider::Weather, Shape::Precipitation, body))
    }

    async fn warnings(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let body = self
            .fetch(self.request("/v7/warning/now")?.query("location", &target.query))
            .await?
            .unwrap_or_else(|| json!({ "warning": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::Alerts, body))
    }

    async fn indices(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let days = args.i64("days").unwrap_or(1);
        let body = self
            .fetch(
                self.request(&format!("/v7/indices/{}d", days))?
                    .query("location", &target.query)
                    .query("type", INDEX_TYPES),
            )
            .await?
            .unwrap_or_else(|| json!({ "daily": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::LifeIndices, body))
    }

    /// Air quality and solar radiation paths are latitude first
    async fn by_lat_lon(&self, args: &ValidatedArgs, prefix: &str, shape: Shape) -> ToolResult<RawResult> {
        let location = args.require_str("location")?;
        let (lon, lat) = require_coordinates(location)?;
        let path = format!("{}/{:.2}/{:.2}", prefix, lat, lon);

        let body = self
            .fetch(self.request(&path)?)
            .await?
            .ok_or_else(|| no_data(location))?;
        Ok(RawResult::new(Provider::Weather, shape, body))
    }

    async fn storm_list(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let year = args.i64("year").unwrap_or_else(|| i64::from(local_now().year()));
        let basin = args.str("basin").unwrap_or("np").to_uppercase();

        let body = self
            .fetch(
                self.request("/v7/tropical/storm-list")?
                    .query("basin", &basin)
                    .query("year", year),
            )
            .await?
            .unwrap_or_else(|| json!({ "storm": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::Storms, body))
    }

    async fn storm(&self, args: &ValidatedArgs, path: &str) -> ToolResult<RawResult> {
        let storm_id = args.require_str("storm_id")?;
        if !storm_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ToolError::Validation(format!(
                "'storm_id': expected an ID such as \"NP_2311\", got '{}'",
                storm_id
            )));
        }

        let body = self
            .fetch(self.request(path)?.query("stormid", storm_id))
            .await?
            .ok_or_else(|| {
                ToolError::UpstreamRejected(format!("no data for storm '{}'", storm_id))
            })?;
        Ok(RawResult::new(Provider::Weather, Shape::StormPath, body))
    }

    async fn tide(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let raw = args.require_str("location")?;
        let location = if raw.contains(',') {
            let (lon, lat) = require_coordinates(raw)?;
            Target::at(lon, lat).query
        } else if is_tide_station(raw) {
            raw.to_ascii_uppercase()
        } else {
            return Err(ToolError::Validation(format!(
                "'location': expected \"lon,lat\" or a tide station ID such as \"P2951\", got '{}'",
                raw
            )));
        };
        let date = date_or_today(args);

        let body = self
            .fetch(
                self.request("/v7/ocean/tide")?
                    .query("location", &location)
                    .query("date", &date),
            )
            .await?
            .unwrap_or_else(|| json!({ "tideTable": [] }));
        Ok(RawResult::new(Provider::Weather, Shape::Tides, body))
    }

    /// Sun and moon times plus the current solar position, fetched together
    async fn astronomy(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let target = self.target(args).await?;
        let date = date_or_today(args);
        let now = local_now();

        let sun = self.fetch(
            self.request("/v7/astronomy/sun")?
                .query("location", &target.query)
                .query("date", &date),
        );
        let moon = self.fetch(
            self.request("/v7/astronomy/moon")?
                .query("location", &target.query)
                .query("date", &date),
        );
        // The elevation endpoint only takes coordinates
        let solar = async {
            match target.point {
                Some((lon, lat)) => {
                    self.fetch(
                        self.request("/v7/astronomy/solar-elevation-angle")?
                            .query("location", Target::at(lon, lat).query)
                            .query("date", &date)
                            .query("time", now.format("%H%M"))
                            .query("tz", "0800")
                            .query("alt", 0),
                    )
                    .await
                }
                None => Ok(None),
            }
        };

        let (sun, moon, solar) = tokio::try_join!(sun, moon, solar)?;
        let sun = sun.ok_or_else(|| no_data(&target.query))?;
        let body = json!({
            "date": date,
            "sun": sun,
            "moon": moon.unwrap_or(Value::Null),
            "solar": solar.unwrap_or(Value::Null),
        });
        Ok(RawResult::new(Provider::Weather, Shape::Astronomy, body))
    }
}

#[async_trait]
impl ProviderClient for WeatherClient {
    fn provider(&self) -> Provider {
        Provider::Weather
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        let location = || {
            ParamSpec::string(
                "location",
                "\"lon,lat\" coordinates (e.g. \"116.41,39.92\") or a numeric QWeather location ID",
            )
            .optional()
        };
        let city = || {
            ParamSpec::string("city", "City or district name; used instead of location").optional()
        };
        let coordinates = || {
            ParamSpec::coordinates("location", "\"lon,lat\" coordinates (e.g. \"116.41,39.92\")")
        };
        let grid = || {
            ParamSpec::boolean("grid", "Use grid (coordinate-interpolated) data")
                .with_default(json!(false))
        };

        vec![
            ToolDescriptor::new(
                "weather",
                "Current weather conditions: temperature, feels-like, wind, humidity, precipitation, pressure and visibility",
                Provider::Weather,
                InputSchema::new(vec![location(), city(), grid()]),
            ),
            ToolDescriptor::new(
                "weather_hourly",
                "Hourly weather forecast for the next 24, 72 or 168 hours (grid data: 24 or 72)",
                Provider::Weather,
                InputSchema::new(vec![
                    location(),
                    city(),
                    ParamSpec::integer_choice("hours", "Forecast horizon in hours", HOURLY_HORIZONS)
                        .with_default(json!(24)),
                    grid(),
                ]),
            ),
            ToolDescriptor::new(
                "weather_daily",
                "Daily weather forecast for the next 3, 7, 10, 15 or 30 days (grid data: 3 or 7)",
                Provider::Weather,
                InputSchema::new(vec![
                    location(),
                    city(),
                    ParamSpec::integer_choice("days", "Forecast horizon in days", DAILY_HORIZONS)
                        .with_default(json!(3)),
                    grid(),
                ]),
            ),
            ToolDescriptor::new(
                "weather_minutely",
                "Precipitation nowcast for the next two hours in five-minute steps",
                Provider::Weather,
                InputSchema::new(vec![location(), city()]),
            ),
            ToolDescriptor::new(
                "weather_warning",
                "Active severe weather warnings (rainstorm, typhoon, gale, heat, ...) for a location",
                Provider::Weather,
                InputSchema::new(vec![location(), city()]),
            ),
            ToolDescriptor::new(
                "weather_indices",
                "Life indices for today or the next 3 days: sport, car wash, dressing, UV, travel and flu",
                Provider::Weather,
                InputSchema::new(vec![
                    location(),
                    city(),
                    ParamSpec::integer_choice("days", "1 for today, 3 for three days", INDEX_HORIZONS)
                        .with_default(json!(1)),
                ]),
            ),
            ToolDescriptor::new(
                "air_quality",
                "Current air quality index, category and primary pollutant",
                Provider::Weather,
                InputSchema::new(vec![coordinates()]),
            ),
            ToolDescriptor::new(
                "air_quality_hourly",
                "Hourly air quality forecast for the next 24 hours",
                Provider::Weather,
                InputSchema::new(vec![coordinates()]),
            ),
            ToolDescriptor::new(
                "air_quality_daily",
                "Daily air quality forecast for the next 3 days",
                Provider::Weather,
                InputSchema::new(vec![coordinates()]),
            ),
            ToolDescriptor::new(
                "storm_list",
                "Tropical storms of a year in a basin; returns the storm IDs used by storm_track and storm_forecast",
                Provider::Weather,
                InputSchema::new(vec![
                    ParamSpec::integer("year", "Season year; defaults to the current year", Some(1949), Some(2100))
                        .optional(),
                    ParamSpec::one_of("basin", "Ocean basin (np: north-west Pacific)", STORM_BASINS)
                        .with_default(json!("np")),
                ]),
            ),
            ToolDescriptor::new(
                "storm_track",
                "Observed track of a tropical storm: position, pressure and wind at each fix",
                Provider::Weather,
                InputSchema::new(vec![ParamSpec::string("storm_id", "Storm ID from storm_list")]),
            ),
            ToolDescriptor::new(
                "storm_forecast",
                "Forecast positions and intensity of an active tropical storm",
                Provider::Weather,
                InputSchema::new(vec![ParamSpec::string("storm_id", "Storm ID from storm_list")]),
            ),
            ToolDescriptor::new(
                "ocean_tide",
                "High and low tide times and heights for a coastal point or tide station",
                Provider::Weather,
                InputSchema::new(vec![
                    ParamSpec::string(
                        "location",
                        "Coastal \"lon,lat\" coordinates or a tide station ID (e.g. \"P2951\")",
                    ),
                    ParamSpec::date("date", "Day as yyyyMMdd; defaults to today (UTC+8)").optional(),
                ]),
            ),
            ToolDescriptor::new(
                "solar_radiation",
                "Hourly solar radiation forecast (GHI, DNI, DHI) with sun elevation and azimuth",
                Provider::Weather,
                InputSchema::new(vec![coordinates()]),
            ),
            ToolDescriptor::new(
                "astronomy",
                "Sunrise, sunset, moonrise, moonset, moon phase and the current sun position",
                Provider::Weather,
                InputSchema::new(vec![
                    location(),
                    city(),
                    ParamSpec::date("date", "Day as yyyyMMdd; defaults to today (UTC+8)").optional(),
                ]),
            ),
        ]
    }

    fn ensure_configured(&self) -> ToolResult<()> {
        require_credential(&self.config, "QWEATHER_API_KEY").map(|_| ())
    }

    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult> {
        debug!(target: "weather", tool = %tool, "Invoking QWeather");
        match tool {
            "weather" => self.current(args).await,
            "weather_hourly" => self.hourly(args).await,
            "weather_daily" => self.daily(args).await,
            "weather_minutely" => self.minutely(args).await,
            "weather_warning" => self.warnings(args).await,
            "weather_indices" => self.indices(args).await,
            "air_quality" => {
                self.by_lat_lon(args, "/airquality/v1/current", Shape::AirQuality)
                    .await
            }
            "air_quality_hourly" => {
                self.by_lat_lon(args, "/airquality/v1/hourly", Shape::AirQualityForecast)
                    .await
            }
            "air_quality_daily" => {
                self.by_lat_lon(args, "/airquality/v1/daily", Shape::AirQualityForecast)
                    .await
            }
            "storm_list" => self.storm_list(args).await,
            "storm_track" => self.storm(args, "/v7/tropical/storm-track").await,
            "storm_forecast" => self.storm(args, "/v7/tropical/storm-forecast").await,
            "ocean_tide" => self.tide(args).await,
            "solar_radiation" => {
                self.by_lat_lon(args, "/solarradiation/v1/forecast", Shape::SolarRadiation)
                    .await
            }
            "astronomy" => self.astronomy(args).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

/// Map the QWeather body `code` onto the failure taxonomy. Bodies without a
/// code (the v1 air quality API) are accepted as-is.
pub fn check_code(body: &Value) -> ToolResult<()> {
    let Some(code) = body.get("code") else {
        return Ok(());
    };
    match code_of(Some(code)) {
        Some(200) | Some(204) => Ok(()),
        Some(c @ (401 | 403)) => Err(ToolError::Unauthorized(format!(
            "QWeather rejected the API key (code {})",
            c
        ))),
        Some(c @ (400 | 402 | 404 | 429)) => {
            warn!(target: "weather", code = c, "QWeather rejected request");
            Err(ToolError::UpstreamRejected(format!(
                "QWeather rejected the request (code {})",
                c
            )))
        }
        Some(c) => Err(ToolError::UpstreamError(format!(
            "QWeather internal error (code {})",
            c
        ))),
        None => Err(ToolError::Malformed(format!(
            "unrecognised QWeather code {}",
            code
        ))),
    }
}

/// "lon,lat" (normalized) or a numeric location ID
fn parse_location(raw: &str) -> ToolResult<Target> {
    if raw.contains(',') {
        let (lon, lat) = require_coordinates(raw)?;
        return Ok(Target::at(lon, lat));
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        Ok(Target {
            query: raw.to_string(),
            point: None,
        })
    } else {
        Err(ToolError::Validation(format!(
            "'location': expected \"lon,lat\" or a numeric location ID, got '{}'; pass place names as 'city'",
            raw
        )))
    }
}

fn is_tide_station(raw: &str) -> bool {
    let mut chars = raw.chars();
    matches!(chars.next(), Some('P' | 'p'))
        && raw.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

fn require_coordinates(location: &str) -> ToolResult<(f64, f64)> {
    parse_coordinates(location).ok_or_else(|| {
        ToolError::Validation(format!(
            "'location': expected \"lon,lat\" coordinates with valid ranges, got '{}'",
            location
        ))
    })
}

fn require_horizon(name: &str, value: i64, allowed: &[i64]) -> ToolResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ToolError::Validation(format!(
            "'{}': grid data supports {:?}, got {}",
            name, allowed, value
        )))
    }
}

/// Wall clock in China Standard Time, which QWeather uses for day boundaries
fn local_now() -> DateTime<Utc> {
    Utc::now() + Duration::hours(8)
}

fn date_or_today(args: &ValidatedArgs) -> String {
    args.str("date")
        .map(str::to_string)
        .unwrap_or_else(|| local_now().format("%Y%m%d").to_string())
}

fn no_data(location: &str) -> ToolError {
    ToolError::UpstreamRejected(format!("no weather data available for '{}'", location))
}
