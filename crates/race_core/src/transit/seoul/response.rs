//! Wire shapes of the Seoul open-data APIs.
//!
//! The bus API wraps records in `msgHeader` / `msgBody.itemList`; the rail API puts
//! an `errorMessage` block next to the record list. Most numeric fields arrive as
//! strings, so everything is read as text and parsed later.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEnvelope<T> {
    pub msg_header: MsgHeader,
    pub msg_body: Option<MsgBody<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgHeader {
    #[serde(deserialize_with = "text")]
    pub header_cd: String,
    #[serde(default, deserialize_with = "text")]
    pub header_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgBody<T> {
    pub item_list: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteItem {
    #[serde(deserialize_with = "text")]
    pub bus_route_id: String,
    #[serde(deserialize_with = "text")]
    pub bus_route_nm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationItem {
    #[serde(deserialize_with = "text")]
    pub st_id: String,
    #[serde(default, deserialize_with = "text")]
    pub ars_id: String,
    #[serde(deserialize_with = "text")]
    pub st_nm: String,
    #[serde(default, deserialize_with = "text")]
    pub tm_x: String,
    #[serde(default, deserialize_with = "text")]
    pub tm_y: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStationItem {
    #[serde(deserialize_with = "text")]
    pub station: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalItem {
    #[serde(default, deserialize_with = "text")]
    pub st_id: String,
    #[serde(default, deserialize_with = "text")]
    pub veh_id1: String,
    #[serde(default, deserialize_with = "text")]
    pub veh_id2: String,
    #[serde(default, deserialize_with = "text")]
    pub tra_time1: String,
    #[serde(default, deserialize_with = "text")]
    pub tra_time2: String,
    #[serde(default, deserialize_with = "text")]
    pub arrmsg1: String,
    #[serde(default, deserialize_with = "text")]
    pub arrmsg2: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusPositionItem {
    #[serde(deserialize_with = "text")]
    pub veh_id: String,
    #[serde(default, deserialize_with = "text")]
    pub tm_x: String,
    #[serde(default, deserialize_with = "text")]
    pub tm_y: String,
    #[serde(default, deserialize_with = "text")]
    pub last_stn_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RailEnvelope {
    pub error_message: Option<RailStatus>,
    pub realtime_arrival_list: Option<Vec<RailArrivalItem>>,
    pub realtime_position_list: Option<Vec<TrainPositionItem>>,
    /// Some failures come back as a bare status block at the top level.
    #[serde(default, deserialize_with = "text")]
    pub code: String,
    #[serde(default, deserialize_with = "text")]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RailStatus {
    #[serde(default, deserialize_with = "text")]
    pub status: String,
    #[serde(default, deserialize_with = "text")]
    pub code: String,
    #[serde(default, deserialize_with = "text")]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RailArrivalItem {
    #[serde(default, deserialize_with = "text")]
    pub subway_id: String,
    #[serde(default, deserialize_with = "text")]
    pub updn_line: String,
    #[serde(default, deserialize_with = "text")]
    pub train_line_nm: String,
    #[serde(default, deserialize_with = "text")]
    pub btrain_no: String,
    #[serde(default, deserialize_with = "text")]
    pub bstatn_nm: String,
    #[serde(default, deserialize_with = "text")]
    pub barvl_dt: String,
    #[serde(default, deserialize_with = "text")]
    pub arvl_cd: String,
    #[serde(default, deserialize_with = "text")]
    pub arvl_msg3: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainPositionItem {
    #[serde(default, deserialize_with = "text")]
    pub train_no: String,
    #[serde(default, deserialize_with = "text")]
    pub statn_nm: String,
    #[serde(default, deserialize_with = "text")]
    pub updn_line: String,
    #[serde(default, deserialize_with = "text")]
    pub statn_tnm: String,
}

/// Accepts a JSON string, number, or null as text.
fn text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
