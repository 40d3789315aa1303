/// Geo provider backed by the Amap web service API
use std::sync::Arc;

use async_trait::async_trait;
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

const ROUTE_MODES: &[&str] = &["driving", "walking", "bicycling", "transit"];

pub struct GeoClient {
    config: ProviderConfig,
    upstream: Upstream,
}

impl GeoClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::from_config(Provider::Geo, config),
        }
    }

    pub fn with_transport(config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::new(Provider::Geo, config, transport),
        }
    }

    fn request(&self, path: &str) -> ToolResult<UpstreamRequest> {
        let key = require_credential(&self.config, "AMAP_API_KEY")?;
        Ok(
            UpstreamRequest::get(format!("{}{}", self.config.base_url, path))
                .query("key", key.expose())
                .query("output", "JSON"),
        )
    }

    async fn fetch(&self, request: UpstreamRequest) -> ToolResult<Value> {
        let resp = self.upstream.send(request).await?;
        let body = resp.json()?;
        check_status(&body)?;
        Ok(body)
    }

    async fn reverse_geocode(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let lat = args.require_f64("lat")?;
        let lon = args.require_f64("lon")?;
        let location = format!("{:.6},{:.6}", lon, lat);

        let mut body = self
            .fetch(
                self.request("/v3/geocode/regeo")?
                    .query("location", &location)
                    .query("extensions", "base"),
            )
            .await?;
        // The regeo payload does not echo the queried point
        body["location"] = json!(location);
        Ok(RawResult::new(Provider::Geo, Shape::Places, body))
    }

    async fn geocode(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let mut request = self
            .request("/v3/geocode/geo")?
            .query("address", args.require_str("address")?);
        if let Some(city) = args.str("city") {
            request = request.query("city", city);
        }
        let body = self.fetch(request).await?;
        Ok(RawResult::new(Provider::Geo, Shape::Places, body))
    }

    /// One of four searches, by precedence: ID, polygon, around `center`,
    /// then plain keyword
    async fn poi_search(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        if let Some(id) = args.str("poi_id") {
            let body = self
                .fetch(self.request("/v3/place/detail")?.query("id", id))
                .await?;
            return Ok(RawResult::new(Provider::Geo, Shape::Places, body));
        }

        let keywords = args.str("keywords").ok_or_else(|| {
            ToolError::Validation("'keywords': is required unless 'poi_id' is given".to_string())
        })?;
        let limit = args.i64("limit").unwrap_or(10);

        let request = if let Some(polygon) = args.str("polygon") {
            self.request("/v3/place/polygon")?
                .query("polygon", parse_polygon(polygon)?)
                .query("keywords", keywords)
        } else if let Some(center) = args.str("center") {
            self.request("/v3/place/around")?
                .query("location", center)
                .query("keywords", keywords)
                .query("radius", args.i64("radius").unwrap_or(3000))
                .query("sortrule", "distance")
        } else {
            let mut request = self.request("/v3/place/text")?.query("keywords", keywords);
            if let Some(city) = args.str("city") {
                request = request.query("city", city).query("citylimit", "true");
            }
            request
        };

        let body = self
            .fetch(
                request
                    .query("offset", limit)
                    .query("page", 1)
                    .query("extensions", "base"),
            )
            .await?;
        Ok(RawResult::new(Provider::Geo, Shape::Places, body))
    }

    /// "lon,lat" as given, otherwise the first geocode or POI match for a
    /// place name
    async fn resolve_point(&self, input: &str, city: Option<&str>) -> ToolResult<String> {
        if let Some((lon, lat)) = parse_coordinates(input) {
            return Ok(format!("{:.6},{:.6}", lon, lat));
        }

        let mut geocode = self.request("/v3/geocode/geo")?.query("address", input);
        if let Some(city) = city {
            geocode = geocode.query("city", city);
        }
        match self.fetch(geocode).await {
            Ok(body) => {
                if let Some(point) = first_location(&body, "geocodes") {
                    debug!(target: "geo", place = %input, location = %point, "Resolved place by geocode");
                    return Ok(point);
                }
            }
            // Not an address; try it as a POI name
            Err(ToolError::UpstreamRejected(_)) => {}
            Err(e) => return Err(e),
        }

        let mut search = self
            .request("/v3/place/text")?
            .query("keywords", input)
            .query("offset", 1)
            .query("citylimit", city.is_some());
        if let Some(city) = city {
            search = search.query("city", city);
        }
        let body = self.fetch(search).await?;
        first_location(&body, "pois").ok_or_else(|| {
            ToolError::UpstreamRejected(format!("could not locate '{}'", input))
        })
    }

    async fn route(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let mode = args.str("mode").unwrap_or("driving");
        let city = args.str("city");
        if mode == "transit" && city.is_none() {
            return Err(ToolError::Validation(
                "'city': is required for transit routes".to_string(),
            ));
        }
        let origin = self.resolve_point(args.require_str("origin")?, city).await?;
        let destination = self
            .resolve_point(args.require_str("destination")?, city)
            .await?;

        let request = match mode {
            "bicycling" => self.request("/v4/direction/bicycling")?,
            "walking" => self.request("/v3/direction/walking")?,
            "transit" => {
                let city = city.unwrap_or_default();
                self.request("/v3/direction/transit/integrated")?
                    .query("city", city)
                    .query("cityd", city)
                    .query("strategy", args.i64("strategy").unwrap_or(0))
                    .query("extensions", "base")
            }
            _ => self
                .request("/v3/direction/driving")?
                .query("strategy", 10)
                .query("extensions", "base"),
        }
        .query("origin", &origin)
        .query("destination", &destination);

        let mut body = self.fetch(request).await?;
        let paths = body
            .pointer("/route/paths")
            .or_else(|| body.pointer("/route/transits"))
            .or_else(|| body.pointer("/data/paths"))
            .and_then(Value::as_array);
        if paths.map_or(true, |p| p.is_empty()) {
            return Err(ToolError::UpstreamRejected(format!(
                "no {} route found from {} to {}",
                mode, origin, destination
            )));
        }
        body["mode"] = json!(mode);
        Ok(RawResult::new(Provider::Geo, Shape::Route, body))
    }

    async fn ip_location(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let mut request = self.request("/v3/ip")?;
        if let Some(ip) = args.str("ip") {
            request = request.query("ip", ip);
        }
        let body = self.fetch(request).await?;
        Ok(RawResult::new(Provider::Geo, Shape::Places, body))
    }
}

#[async_trait]
impl ProviderClient for GeoClient {
    fn provider(&self) -> Provider {
        Provider::Geo
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "geo",
                "Reverse geocode a latitude/longitude into a formatted address and region code",
                Provider::Geo,
                InputSchema::new(vec![
                    ParamSpec::number("lat", "Latitude in degrees", Some(-90.0), Some(90.0)),
                    ParamSpec::number("lon", "Longitude in degrees", Some(-180.0), Some(180.0)),
                ]),
            ),
            ToolDescriptor::new(
                "geocode",
                "Resolve a structured address into coordinates",
                Provider::Geo,
                InputSchema::new(vec![
                    ParamSpec::string("address", "Address or place name"),
                    ParamSpec::string("city", "City name or adcode to narrow the match").optional(),
                ]),
            ),
            ToolDescriptor::new(
                "poi_search",
                "Search points of interest by keyword; pass center to search around a point, polygon to search inside an area, or poi_id to fetch one POI",
                Provider::Geo,
                InputSchema::new(vec![
                    ParamSpec::string("keywords", "Search keywords; required unless poi_id is given")
                        .optional(),
                    ParamSpec::string("poi_id", "Amap POI ID to look up").optional(),
                    ParamSpec::string(
                        "polygon",
                        "Search area as \"lon,lat|lon,lat|lon,lat...\" with at least 3 points",
                    )
                    .optional(),
                    ParamSpec::string("city", "Restrict a keyword search to this city").optional(),
                    ParamSpec::coordinates("center", "\"lon,lat\" centre for an around search")
                        .optional(),
                    ParamSpec::integer("radius", "Around-search radius in metres", Some(1), Some(50_000))
                        .with_default(json!(3000)),
                    ParamSpec::integer("limit", "Maximum results", Some(1), Some(25))
                        .with_default(json!(10)),
                ]),
            ),
            ToolDescriptor::new(
                "route",
                "Plan a driving, walking, bicycling or public transit route between two places",
                Provider::Geo,
                InputSchema::new(vec![
                    ParamSpec::string("origin", "Start point: \"lon,lat\" or a place name"),
                    ParamSpec::string("destination", "End point: \"lon,lat\" or a place name"),
                    ParamSpec::one_of("mode", "Travel mode", ROUTE_MODES)
                        .with_default(json!("driving")),
                    ParamSpec::string("city", "City for place-name lookup; required for transit")
                        .optional(),
                    ParamSpec::integer(
                        "strategy",
                        "Transit strategy: 0 fastest, 1 cheapest, 2 fewest transfers, 3 least walking, 5 no subway",
                        Some(0),
                        Some(8),
                    )
                    .with_default(json!(0)),
                ]),
            ),
            ToolDescriptor::new(
                "ip_location",
                "Locate an IPv4 address (or the caller's address when omitted) to city level",
                Provider::Geo,
                InputSchema::new(vec![ParamSpec::ipv4("ip", "IPv4 address").optional()]),
            ),
        ]
    }

    fn ensure_configured(&self) -> ToolResult<()> {
        require_credential(&self.config, "AMAP_API_KEY").map(|_| ())
    }

    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult> {
        debug!(target: "geo", tool = %tool, "Invoking Amap");
        match tool {
            "geo" => self.reverse_geocode(args).await,
            "geocode" => self.geocode(args).await,
            "poi_search" => self.poi_search(args).await,
            "route" => self.route(args).await,
            "ip_location" => self.ip_location(args).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

/// "lon,lat|lon,lat|..." with at least three valid vertices
fn parse_polygon(raw: &str) -> ToolResult<String> {
    let vertices = raw
        .split('|')
        .map(|p| parse_coordinates(p).map(|(lon, lat)| format!("{:.6},{:.6}", lon, lat)))
        .collect::<Option<Vec<_>>>();
    match vertices {
        Some(v) if v.len() >= 3 => Ok(v.join("|")),
        _ => Err(ToolError::Validation(format!(
            "'polygon': expected at least 3 \"lon,lat\" points separated by '|', got '{}'",
            raw
        ))),
    }
}

/// `location` of the first entry in `list`; Amap sends `[]` when absent
fn first_location(body: &Value, list: &str) -> Option<String> {
    body.get(list)?
        .as_array()?
        .first()?
        .get("location")?
        .as_str()
        .filter(|l| parse_coordinates(l).is_some())
        .map(str::to_string)
}

/// Check an Amap body: v3 uses `status`/`infocode`, v4 uses `errcode`
pub fn check_status(body: &Value) -> ToolResult<()> {
    if let Some(errcode) = body.get("errcode") {
        return match code_of(Some(errcode)) {
            Some(0) => Ok(()),
            Some(code) => Err(classify_infocode(code, text_of(body.get("errmsg")))),
            None => Err(ToolError::Malformed(format!("unrecognised errcode {}", errcode))),
        };
    }

    match text_of(body.get("status")) {
        "1" => Ok(()),
        "0" => match code_of(body.get("infocode")) {
            Some(code) => Err(classify_infocode(code, text_of(body.get("info")))),
            None => Err(ToolError::Malformed("failure without infocode".to_string())),
        },
        _ => Err(ToolError::Malformed("missing status field".to_string())),
    }
}

fn classify_infocode(code: i64, info: &str) -> ToolError {
    warn!(target: "geo", infocode = code, info = %info, "Amap request failed");
    let detail = format!("Amap infocode {}: {}", code, info);
    match code {
        10001 | 10002 | 10006 | 10007 | 10009 | 10010 | 10011 | 10012 => {
            ToolError::Unauthorized(detail)
        }
        10003 | 10004 | 10014 | 10019 | 10020 | 10021 | 10044 | 10045 => {
            ToolError::UpstreamRejected(detail)
        }
        20000..=20899 => ToolError::UpstreamRejected(detail),
        _ => ToolError::UpstreamError(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{MockTransport, UpstreamResponse};

    fn config() -> ProviderConfig {
        ProviderConfig::new("https://amap.test").with_credential("amap-key")
    }

    fn validated(client: &GeoClient, tool: &str, args: Value) -> ValidatedArgs {
        client
            .tools()
            .into_iter()
            .find(|d| d.name == tool)
            .unwrap()
            .input_schema
            .validate(&args)
            .unwrap()
    }

    #[tokio::test]
    async fn test_reverse_geocode_echoes_location() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/geocode/regeo"
                    && req.query_value("key") == Some("amap-key")
                    && req.query_value("location") == Some("116.481488,39.990464")
            })
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"{"status":"1","infocode":"10000","regeocode":{"formatted_address":"Wangjing"}}"#,
                ))
            });

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(&client, "geo", json!({"lat": 39.990464, "lon": 116.481488}));
        let raw = client.invoke("geo", &args).await.unwrap();
        assert_eq!(raw.body["location"], "116.481488,39.990464");
    }

    #[tokio::test]
    async fn test_poi_search_switches_to_around() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/place/around"
                    && req.query_value("radius") == Some("500")
                    && req.query_value("location") == Some("116.41,39.92")
            })
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(200, r#"{"status":"1","pois":[]}"#)));

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "poi_search",
            json!({"keywords": "coffee", "center": "116.41,39.92", "radius": 500}),
        );
        assert!(client.invoke("poi_search", &args).await.is_ok());
    }

    #[tokio::test]
    async fn test_bicycling_uses_v4_and_checks_errcode() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| req.url == "https://amap.test/v4/direction/bicycling")
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"{"errcode":0,"data":{"paths":[{"distance":1200,"duration":300,"steps":[]}]}}"#,
                ))
            });

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "route",
            json!({"origin": "116.40,39.90", "destination": "116.41,39.92", "mode": "bicycling"}),
        );
        let raw = client.invoke("route", &args).await.unwrap();
        assert_eq!(raw.shape, Shape::Route);
        assert_eq!(raw.body["mode"], "bicycling");
    }

    #[tokio::test]
    async fn test_empty_route_is_rejected() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(UpstreamResponse::new(
                200,
                r#"{"status":"1","route":{"paths":[]}}"#,
            ))
        });

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "route",
            json!({"origin": "116.40,39.90", "destination": "116.41,39.92"}),
        );
        assert!(matches!(
            client.invoke("route", &args).await,
            Err(ToolError::UpstreamRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_transit_route_resolves_place_names() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/geocode/geo"
                    && req.query_value("address") == Some("Tiananmen")
                    && req.query_value("city") == Some("Beijing")
            })
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"{"status":"1","geocodes":[{"location":"116.397455,39.909187"}]}"#,
                ))
            });
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/direction/transit/integrated"
                    && req.query_value("origin") == Some("116.397455,39.909187")
                    && req.query_value("destination") == Some("116.481488,39.990464")
                    && req.query_value("city") == Some("Beijing")
                    && req.query_value("cityd") == Some("Beijing")
                    && req.query_value("strategy") == Some("2")
            })
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"{"status":"1","route":{"transits":[{"distance":"15000","duration":"2700","segments":[]}]}}"#,
                ))
            });

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "route",
            json!({"origin": "Tiananmen", "destination": "116.481488,39.990464",
                   "mode": "transit", "city": "Beijing", "strategy": 2}),
        );
        let raw = client.invoke("route", &args).await.unwrap();
        assert_eq!(raw.body["mode"], "transit");
    }

    #[tokio::test]
    async fn test_place_name_falls_back_to_poi_search() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| req.url == "https://amap.test/v3/geocode/geo")
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(200, r#"{"status":"1","geocodes":[]}"#)));
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/place/text"
                    && req.query_value("keywords") == Some("Nowhere Cafe")
            })
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(200, r#"{"status":"1","pois":[]}"#)));

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "route",
            json!({"origin": "Nowhere Cafe", "destination": "116.41,39.92", "mode": "walking"}),
        );
        assert!(matches!(
            client.invoke("route", &args).await,
            Err(ToolError::UpstreamRejected(ref m)) if m.contains("Nowhere Cafe")
        ));
    }

    #[tokio::test]
    async fn test_transit_without_city_is_rejected_before_network() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(0);

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(
            &client,
            "route",
            json!({"origin": "116.40,39.90", "destination": "116.41,39.92", "mode": "transit"}),
        );
        assert!(matches!(
            client.invoke("route", &args).await,
            Err(ToolError::Validation(ref m)) if m.contains("city")
        ));
    }

    #[tokio::test]
    async fn test_poi_search_by_id_and_polygon() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/place/detail"
                    && req.query_value("id") == Some("B000A83M61")
            })
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(200, r#"{"status":"1","pois":[]}"#)));
        mock.expect_send()
            .withf(|req| {
                req.url == "https://amap.test/v3/place/polygon"
                    && req.query_value("polygon")
                        == Some("116.300000,39.900000|116.400000,39.900000|116.400000,40.000000")
            })
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(200, r#"{"status":"1","pois":[]}"#)));

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        let args = validated(&client, "poi_search", json!({"poi_id": "B000A83M61"}));
        assert!(client.invoke("poi_search", &args).await.is_ok());

        let args = validated(
            &client,
            "poi_search",
            json!({"keywords": "park", "polygon": "116.3,39.9|116.4,39.9|116.4,40.0"}),
        );
        assert!(client.invoke("poi_search", &args).await.is_ok());
    }

    #[tokio::test]
    async fn test_poi_search_needs_keywords_or_id() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(0);

        let client = GeoClient::with_transport(&config(), Arc::new(mock));
        for args in [
            json!({}),
            json!({"keywords": "park", "polygon": "116.3,39.9|116.4,39.9"}),
        ] {
            let args = validated(&client, "poi_search", args);
            assert!(matches!(
                client.invoke("poi_search", &args).await,
                Err(ToolError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_malformed_ip_fails_validation() {
        let client = GeoClient::with_transport(&config(), Arc::new(MockTransport::new()));
        let schema = client
            .tools()
            .into_iter()
            .find(|d| d.name == "ip_location")
            .unwrap()
            .input_schema;
        assert!(schema.validate(&json!({"ip": "114.247.50.2"})).is_ok());
        assert!(matches!(
            schema.validate(&json!({"ip": "114.247.50.2&key=other"})),
            Err(ToolError::Validation(_))
        ));
    }

    #[test]
    fn test_infocode_mapping() {
        let failure = |code: &str| json!({"status": "0", "info": "x", "infocode": code});
        assert!(check_status(&json!({"status": "1"})).is_ok());
        assert!(matches!(
            check_status(&failure("10001")),
            Err(ToolError::Unauthorized(_))
        ));
        assert!(matches!(
            check_status(&failure("10003")),
            Err(ToolError::UpstreamRejected(_))
        ));
        assert!(matches!(
            check_status(&failure("20003")),
            Err(ToolError::UpstreamRejected(_))
        ));
        assert!(matches!(
            check_status(&failure("30001")),
            Err(ToolError::UpstreamError(_))
        ));
        assert!(matches!(
            check_status(&json!({"errcode": 10044, "errmsg": "quota"})),
            Err(ToolError::UpstreamRejected(_))
        ));
        assert!(matches!(
            check_status(&json!({"pois": []})),
            Err(ToolError::Malformed(_))
        ));
    }
}
