use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;

use crate::engine::FindError;
use crate::model::*;

const SNAPSHOT_PATH: &str = "/web/AnonymousServersApi.aspx/GetBrowseLocationsBookings";
const LOCATION_PATH: &str = "/web/AnonymousServersApi.aspx/GetLocationDetails";

/// The two booking-platform calls the engine needs. Both return the raw
/// response body; decoding lives in [`decode_snapshot`] / [`decode_location`].
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn booking_snapshot(
        &self,
        creds: &CredentialBundle,
        window: &AvailabilityWindow,
    ) -> Result<String, FindError>;

    async fn location_details(
        &self,
        creds: &CredentialBundle,
        building_id: BuildingId,
        room_id: RoomId,
    ) -> Result<String, FindError>;
}

// ── Wire shapes ──────────────────────────────────────────────────

/// Every response wraps its payload as a JSON string in `d`.
#[derive(Deserialize)]
struct Envelope {
    d: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnapshotPayload {
    bookings: Vec<RawBooking>,
}

#[derive(Deserialize)]
struct RawBooking {
    #[serde(rename = "RoomId")]
    room_id: RoomId,
    #[serde(rename = "BuildingId")]
    building_id: BuildingId,
    #[serde(rename = "BookingGMTStart")]
    start: String,
    #[serde(rename = "BookingGMTEnd")]
    end: String,
}

/// Location details nest a second JSON string under `JsonData`.
#[derive(Deserialize)]
struct LocationPayload {
    #[serde(rename = "JsonData")]
    json_data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoomDetails {
    room_id: RoomId,
    room_code: String,
    building_code: String,
    room_description: String,
}

fn unwrap_envelope(body: &str, what: &str) -> Result<String, FindError> {
    serde_json::from_str::<Envelope>(body)
        .map(|env| env.d)
        .map_err(|e| FindError::parse(what, e))
}

/// Decode a booking snapshot body into normalized bookings.
///
/// Any malformed record fails the whole snapshot.
pub fn decode_snapshot(body: &str) -> Result<Vec<Booking>, FindError> {
    let inner = unwrap_envelope(body, "snapshot envelope")?;
    let payload: SnapshotPayload =
        serde_json::from_str(&inner).map_err(|e| FindError::parse("snapshot payload", e))?;

    payload
        .bookings
        .into_iter()
        .map(|raw| {
            let start = parse_snapshot_ts(&raw.start)
                .map_err(|e| FindError::parse(&format!("BookingGMTStart {:?}", raw.start), e))?;
            let end = parse_snapshot_ts(&raw.end)
                .map_err(|e| FindError::parse(&format!("BookingGMTEnd {:?}", raw.end), e))?;
            if end < start {
                return Err(FindError::Parse(format!(
                    "booking for room {} ends before it starts",
                    raw.room_id
                )));
            }
            Ok(Booking {
                room_id: raw.room_id,
                building_id: raw.building_id,
                span: Span::new(start, end),
            })
        })
        .collect()
}

/// Decode a location-details body. The building id is the one the request
/// was made for; the payload does not echo it.
pub fn decode_location(body: &str, building_id: BuildingId) -> Result<Room, FindError> {
    let inner = unwrap_envelope(body, "location envelope")?;
    let payload: LocationPayload =
        serde_json::from_str(&inner).map_err(|e| FindError::parse("location payload", e))?;
    let details: RoomDetails = serde_json::from_str(&payload.json_data)
        .map_err(|e| FindError::parse("location JsonData", e))?;

    Ok(Room {
        room_id: details.room_id,
        room_code: details.room_code,
        building_id,
        building_code: details.building_code,
        name: details.room_description,
    })
}

/// Request body for the snapshot endpoint: the window plus the fixed
/// all-locations / Eastern Time filters.
pub fn snapshot_request(window: &AvailabilityWindow) -> serde_json::Value {
    json!({
        "filterData": {
            "filters": [
                {
                    "filterName": "StartDate",
                    "value": window.start.format(REQUEST_TS_FORMAT).to_string(),
                    "displayValue": " ",
                    "filterType": 3
                },
                {
                    "filterName": "EndDate",
                    "value": window.end.format(REQUEST_TS_FORMAT).to_string(),
                    "displayValue": "",
                    "filterType": 3
                },
                {
                    "filterName": "Locations",
                    "value": "-1",
                    "displayValue": "(all)",
                    "filterType": 8
                },
                {
                    "filterName": "TimeZone",
                    "value": "61",
                    "displayValue": "Eastern Time",
                    "filterType": 2
                }
            ]
        }
    })
}

// ── HTTP implementation ──────────────────────────────────────────

/// `reqwest`-backed client for an EMS cloud deployment.
pub struct EmsClient {
    http: reqwest::Client,
    base_url: String,
}

impl EmsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FindError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Browser-like defaults overlaid by the bundle's own headers, plus cookies.
    fn headers(&self, creds: &CredentialBundle) -> HeaderMap {
        let origin = self.base_url.clone();
        let referer = format!("{}/web/BrowseForSpace.aspx", self.base_url);
        let defaults = [
            ("accept", "application/json, text/javascript, */*; q=0.01"),
            ("accept-language", "en-US,en;q=0.9"),
            ("cache-control", "no-cache"),
            ("pragma", "no-cache"),
            ("origin", origin.as_str()),
            ("referer", referer.as_str()),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("x-requested-with", "XMLHttpRequest"),
        ];

        let mut map = HeaderMap::new();
        for (name, value) in defaults {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.insert(HeaderName::from_static(name), value);
            }
        }
        for (name, value) in &creds.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!("skipping unusable credential header {name:?}"),
            }
        }
        if !creds.cookies.is_empty() {
            match HeaderValue::from_str(&creds.cookie_header()) {
                Ok(value) => {
                    map.insert(COOKIE, value);
                }
                Err(_) => tracing::warn!("credential cookies are not a valid header value"),
            }
        }
        map
    }

    async fn post(
        &self,
        path: &str,
        creds: &CredentialBundle,
        body: &serde_json::Value,
    ) -> Result<String, FindError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .headers(self.headers(creds))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Upstream for EmsClient {
    async fn booking_snapshot(
        &self,
        creds: &CredentialBundle,
        window: &AvailabilityWindow,
    ) -> Result<String, FindError> {
        self.post(SNAPSHOT_PATH, creds, &snapshot_request(window)).await
    }

    async fn location_details(
        &self,
        creds: &CredentialBundle,
        building_id: BuildingId,
        room_id: RoomId,
    ) -> Result<String, FindError> {
        let body = json!({ "buildingId": building_id, "roomId": room_id });
        self.post(LOCATION_PATH, creds, &body).await
    }
}

/// Test helpers for building upstream bodies the way the platform encodes them.
#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    /// `(room_id, building_id, start, end)` with `YYYY-MM-DDTHH:MM:SS` timestamps.
    pub fn snapshot_body<S: AsRef<str>>(bookings: &[(i64, i64, S, S)]) -> String {
        let records: Vec<_> = bookings
            .iter()
            .map(|(room, building, start, end)| {
                json!({
                    "RoomId": room,
                    "BuildingId": building,
                    "BookingGMTStart": start.as_ref(),
                    "BookingGMTEnd": end.as_ref(),
                })
            })
            .collect();
        let inner = json!({ "Bookings": records }).to_string();
        json!({ "d": inner }).to_string()
    }

    pub fn location_body(room_id: i64, room_code: &str, building_code: &str, name: &str) -> String {
        let room = json!({
            "RoomId": room_id,
            "RoomCode": room_code,
            "BuildingCode": building_code,
            "RoomDescription": name,
        })
        .to_string();
        let inner = json!({ "JsonData": room }).to_string();
        json!({ "d": inner }).to_string()
    }
}
