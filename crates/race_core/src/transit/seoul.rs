//! Bus and rail providers over the Seoul open-data HTTP APIs.

mod parser;
mod response;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use self::response::{
    ArrivalItem, BusEnvelope, BusPositionItem, RailEnvelope, RouteItem, RouteStationItem, StationItem,
};
use super::{BusArrival, BusProvider, BusRoute, BusStation, RailArrival, RailProvider, TrainPosition, VehiclePosition};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Client for `ws.bus.go.kr`.
#[derive(Debug, Clone)]
pub struct SeoulBusClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SeoulBusClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn items<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<T>, ProviderError> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, path))
            .map_err(|err| ProviderError::Api(format!("failed to build bus API URL: {err}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("serviceKey", &self.api_key);
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("resultType", "json");
        }
        debug!(path, "bus API request");
        let envelope: BusEnvelope<T> = self.client.get(url).send().await?.error_for_status()?.json().await?;
        parser::bus_items(envelope)
    }
}

#[async_trait]
impl BusProvider for SeoulBusClient {
    async fn find_routes(&self, route_name: &str) -> Result<Vec<BusRoute>, ProviderError> {
        let items: Vec<RouteItem> = self
            .items("busRouteInfo/getBusRouteList", &[("strSrch", route_name)])
            .await?;
        Ok(parser::routes(items))
    }

    async fn find_stations(&self, name: &str) -> Result<Vec<BusStation>, ProviderError> {
        let items: Vec<StationItem> = self.items("stationinfo/getStationByName", &[("stSrch", name)]).await?;
        Ok(parser::stations(items))
    }

    async fn route_station_ids(&self, route_id: &str) -> Result<Vec<String>, ProviderError> {
        let items: Vec<RouteStationItem> = self
            .items("busRouteInfo/getStaionByRoute", &[("busRouteId", route_id)])
            .await?;
        Ok(parser::route_station_ids(items))
    }

    async fn arrivals(&self, route_id: &str, station_id: &str) -> Result<Vec<BusArrival>, ProviderError> {
        let items: Vec<ArrivalItem> = self
            .items("arrive/getArrInfoByRouteAll", &[("busRouteId", route_id)])
            .await?;
        Ok(parser::arrivals_at(items, station_id))
    }

    async fn vehicle_position(&self, vehicle_id: &str) -> Result<Option<VehiclePosition>, ProviderError> {
        let items: Vec<BusPositionItem> = self.items("buspos/getBusPosByVehId", &[("vehId", vehicle_id)]).await?;
        Ok(parser::vehicle_position(items, vehicle_id))
    }
}

/// Client for `swopenAPI.seoul.go.kr`. The key is a path segment, not a query pair.
#[derive(Debug, Clone)]
pub struct SeoulRailClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SeoulRailClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn envelope(&self, service: &str, end: &str, subject: &str) -> Result<RailEnvelope, ProviderError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| ProviderError::Api(format!("failed to build rail API URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Api("rail API URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend([self.api_key.as_str(), "json", service, "0", end, subject]);
        debug!(service, subject, "rail API request");
        Ok(self.client.get(url).send().await?.error_for_status()?.json().await?)
    }
}

#[async_trait]
impl RailProvider for SeoulRailClient {
    async fn station_arrivals(&self, station_name: &str) -> Result<Vec<RailArrival>, ProviderError> {
        parser::rail_arrivals(self.envelope("realtimeStationArrival", "20", station_name).await?)
    }

    async fn train_positions(&self, line_name: &str) -> Result<Vec<TrainPosition>, ProviderError> {
        parser::train_positions(self.envelope("realtimePosition", "100", line_name).await?)
    }
}

/// Providers for whichever API keys are configured.
pub fn providers_from_config(
    config: &ProviderConfig,
) -> Result<(Option<Arc<dyn BusProvider>>, Option<Arc<dyn RailProvider>>), ProviderError> {
    let timeout = config.call_timeout();
    let bus = match &config.bus_api_key {
        Some(key) => Some(Arc::new(SeoulBusClient::new(&config.bus_base_url, key, timeout)?) as Arc<dyn BusProvider>),
        None => None,
    };
    let rail = match &config.rail_api_key {
        Some(key) => {
            Some(Arc::new(SeoulRailClient::new(&config.rail_base_url, key, timeout)?) as Arc<dyn RailProvider>)
        }
        None => None,
    };
    Ok((bus, rail))
}
