//! Pure conversions from wire shapes to provider records.

use super::response::{
    ArrivalItem, BusEnvelope, BusPositionItem, RailArrivalItem, RailEnvelope, RouteItem, RouteStationItem, StationItem,
    TrainPositionItem,
};
use crate::error::ProviderError;
use crate::geo::Position;
use crate::transit::{BusArrival, BusRoute, BusStation, RailArrival, TrainPosition, VehiclePosition};

const BUS_OK: &str = "0";
const BUS_NO_RESULT: &str = "4";
const RAIL_OK: &str = "INFO-000";
const RAIL_NO_DATA: &str = "INFO-200";

/// Items of a bus response; "no results" is an empty list.
pub fn bus_items<T>(envelope: BusEnvelope<T>) -> Result<Vec<T>, ProviderError> {
    match envelope.msg_header.header_cd.as_str() {
        BUS_OK | BUS_NO_RESULT => Ok(envelope.msg_body.and_then(|b| b.item_list).unwrap_or_default()),
        code => Err(ProviderError::Api(format!(
            "[{code}] {}",
            envelope.msg_header.header_msg
        ))),
    }
}

pub fn routes(items: Vec<RouteItem>) -> Vec<BusRoute> {
    items
        .into_iter()
        .map(|item| BusRoute {
            route_id: item.bus_route_id,
            route_name: item.bus_route_nm,
        })
        .collect()
}

/// Stations with unusable coordinates are dropped.
pub fn stations(items: Vec<StationItem>) -> Vec<BusStation> {
    items
        .into_iter()
        .filter_map(|item| {
            let position = coordinate(&item.tm_x, &item.tm_y)?;
            Some(BusStation {
                station_id: item.st_id,
                ars_id: item.ars_id,
                name: item.st_nm,
                position,
            })
        })
        .collect()
}

pub fn route_station_ids(items: Vec<RouteStationItem>) -> Vec<String> {
    items.into_iter().map(|item| item.station).collect()
}

/// First and second vehicle approaching `station_id`.
pub fn arrivals_at(items: Vec<ArrivalItem>, station_id: &str) -> Vec<BusArrival> {
    let Some(item) = items.into_iter().find(|item| item.st_id == station_id) else {
        return Vec::new();
    };
    vec![
        bus_arrival(&item.veh_id1, &item.tra_time1, item.arrmsg1.clone()),
        bus_arrival(&item.veh_id2, &item.tra_time2, item.arrmsg2),
    ]
}

fn bus_arrival(vehicle_id: &str, travel_time: &str, message: String) -> BusArrival {
    let vehicle_id = vehicle_id.trim();
    BusArrival {
        vehicle_id: (!vehicle_id.is_empty()).then(|| vehicle_id.to_string()),
        eta_secs: positive_secs(travel_time),
        message,
    }
}

pub fn vehicle_position(items: Vec<BusPositionItem>, vehicle_id: &str) -> Option<VehiclePosition> {
    items
        .into_iter()
        .filter(|item| item.veh_id == vehicle_id)
        .find_map(|item| {
            let position = coordinate(&item.tm_x, &item.tm_y)?;
            Some(VehiclePosition {
                vehicle_id: item.veh_id,
                position,
                current_stop: (!item.last_stn_id.is_empty()).then_some(item.last_stn_id),
            })
        })
}

pub fn rail_arrivals(envelope: RailEnvelope) -> Result<Vec<RailArrival>, ProviderError> {
    rail_status(&envelope)?;
    Ok(envelope
        .realtime_arrival_list
        .unwrap_or_default()
        .into_iter()
        .map(rail_arrival)
        .collect())
}

fn rail_arrival(item: RailArrivalItem) -> RailArrival {
    RailArrival {
        line_id: item.subway_id,
        direction_label: item.updn_line,
        train_line_name: item.train_line_nm,
        train_no: item.btrain_no,
        terminal_station: item.bstatn_nm,
        eta_secs: positive_secs(&item.barvl_dt),
        // Unknown codes never count as imminent.
        arrival_code: item.arvl_cd.trim().parse().unwrap_or(u8::MAX),
        current_station: item.arvl_msg3,
    }
}

pub fn train_positions(envelope: RailEnvelope) -> Result<Vec<TrainPosition>, ProviderError> {
    rail_status(&envelope)?;
    Ok(envelope
        .realtime_position_list
        .unwrap_or_default()
        .into_iter()
        .map(|item: TrainPositionItem| TrainPosition {
            train_no: item.train_no,
            station_name: item.statn_nm,
            direction_label: item.updn_line,
            terminal_station: item.statn_tnm,
        })
        .collect())
}

fn rail_status(envelope: &RailEnvelope) -> Result<(), ProviderError> {
    let (code, message) = match &envelope.error_message {
        Some(status) => (status.code.as_str(), status.message.as_str()),
        None => (envelope.code.as_str(), envelope.message.as_str()),
    };
    match code {
        "" | RAIL_OK | RAIL_NO_DATA => Ok(()),
        code => Err(ProviderError::Api(format!("[{code}] {message}"))),
    }
}

fn coordinate(lon: &str, lat: &str) -> Option<Position> {
    let lon: f64 = lon.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    (lon != 0.0 && lat != 0.0).then(|| Position::new(lon, lat))
}

fn positive_secs(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|secs| *secs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus<T: serde::de::DeserializeOwned>(json: &str) -> Result<Vec<T>, ProviderError> {
        bus_items(serde_json::from_str::<BusEnvelope<T>>(json).expect("envelope"))
    }

    #[test]
    fn station_search_keeps_rows_with_coordinates() {
        let json = r#"{
            "msgHeader": {"headerCd": "0", "headerMsg": "정상적으로 처리되었습니다.", "itemCount": 0},
            "msgBody": {"itemList": [
                {"stId": "121000012", "arsId": "21130", "stNm": "신림역", "tmX": "126.9299", "tmY": "37.4844"},
                {"stId": "121000013", "arsId": "21131", "stNm": "신림역", "tmX": "", "tmY": ""}
            ]}
        }"#;
        let parsed = stations(bus::<StationItem>(json).expect("items"));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].station_id, "121000012");
        assert_eq!(parsed[0].ars_id, "21130");
    }

    #[test]
    fn no_result_header_is_empty_and_errors_surface() {
        let empty = r#"{"msgHeader": {"headerCd": "4", "headerMsg": "결과가 없습니다."}, "msgBody": {"itemList": null}}"#;
        assert!(bus::<RouteItem>(empty).expect("empty").is_empty());

        let denied = r#"{"msgHeader": {"headerCd": "7", "headerMsg": "인증 실패"}}"#;
        let err = bus::<RouteItem>(denied).expect_err("api error");
        assert!(err.to_string().contains("[7]"));
    }

    #[test]
    fn arrivals_pick_the_requested_station() {
        let json = r#"{
            "msgHeader": {"headerCd": "0", "headerMsg": "ok"},
            "msgBody": {"itemList": [
                {"stId": "a", "vehId1": "111", "traTime1": "60", "arrmsg1": "1분후", "vehId2": "", "traTime2": "0", "arrmsg2": "출발대기"},
                {"stId": "b", "vehId1": "222", "traTime1": 0, "arrmsg1": "곧 도착", "vehId2": "333", "traTime2": "540", "arrmsg2": "9분후[4번째 전]"}
            ]}
        }"#;
        let arrivals = arrivals_at(bus::<ArrivalItem>(json).expect("items"), "b");
        assert_eq!(arrivals.len(), 2);
        assert_eq!(arrivals[0].vehicle_id.as_deref(), Some("222"));
        assert_eq!(arrivals[0].eta_secs, None);
        assert_eq!(arrivals[1].eta_secs, Some(540));
    }

    #[test]
    fn rail_arrivals_read_codes_and_times() {
        let json = r#"{
            "errorMessage": {"status": 200, "code": "INFO-000", "message": "정상 처리되었습니다."},
            "realtimeArrivalList": [
                {"subwayId": "1002", "updnLine": "내선", "trainLineNm": "성수행 - 도림천방면", "btrainNo": "2156",
                 "bstatnNm": "성수", "barvlDt": "0", "arvlCd": "1", "arvlMsg3": "문래"}
            ]
        }"#;
        let arrivals = rail_arrivals(serde_json::from_str(json).expect("envelope")).expect("ok");
        assert_eq!(arrivals.len(), 1);
        assert!(arrivals[0].is_imminent());
        assert_eq!(arrivals[0].train_no, "2156");
    }

    #[test]
    fn rail_no_data_is_empty() {
        let json = r#"{"status": 500, "code": "INFO-200", "message": "해당하는 데이터가 없습니다."}"#;
        let positions = train_positions(serde_json::from_str(json).expect("envelope")).expect("ok");
        assert!(positions.is_empty());

        let bad_key = r#"{"status": 500, "code": "ERROR-337", "message": "일일 호출 한도 초과"}"#;
        assert!(train_positions(serde_json::from_str(bad_key).expect("envelope")).is_err());
    }
}
