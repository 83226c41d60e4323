//! Car store application.
//!
//! Keeps car records in memory, keyed by serial number.
//!
//! ```text
//! {"action":"save","serial_number":7,"car_data":{"owner_name":"Ann"}}  -> {"answer":"ok"}
//! {"action":"get","serial_number":7}     -> {"serial_number":7,"owner_name":"Ann"}
//! {"action":"delete","serial_number":7}  -> {"answer":"ok"}
//! {"action":"get","serial_number":7}     -> {"answer":"not_found"}
//! ```
//!
//! Record fields are range-checked on save (`u8`/`u16`/`u32`/`u64` columns);
//! unknown fields and out-of-range values fail the request.

use crate::runtime::{Handler, HandlerError, Outcome};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// A stored car. Absent fields are left out of returned documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Car {
    #[serde(deserialize_with = "serial_number")]
    pub serial_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_center_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_year: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_code: Option<String>,
    #[serde(rename = "engine__capacity", skip_serializing_if = "Option::is_none")]
    pub engine_capacity: Option<u16>,
    #[serde(rename = "engine__num_cylinders", skip_serializing_if = "Option::is_none")]
    pub engine_num_cylinders: Option<u8>,
    #[serde(rename = "fuel_figures__speed", skip_serializing_if = "Option::is_none")]
    pub fuel_speed: Option<u16>,
    #[serde(rename = "fuel_figures__mpg", skip_serializing_if = "Option::is_none")]
    pub fuel_mpg: Option<f64>,
    #[serde(
        rename = "fuel_figures__usage_description",
        skip_serializing_if = "Option::is_none"
    )]
    pub fuel_usage_description: Option<String>,
    #[serde(
        rename = "performance_figures__octane_rating",
        skip_serializing_if = "Option::is_none"
    )]
    pub octane_rating: Option<u16>,
    #[serde(
        rename = "performance_figures__acceleration__mph",
        skip_serializing_if = "Option::is_none"
    )]
    pub acceleration_mph: Option<u16>,
    #[serde(
        rename = "performance_figures__acceleration__seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub acceleration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum Request {
    Get {
        #[serde(deserialize_with = "serial_number")]
        serial_number: u64,
    },
    Save {
        serial_number: Value,
        car_data: Map<String, Value>,
    },
    Delete {
        #[serde(deserialize_with = "serial_number")]
        serial_number: u64,
    },
}

/// Serial numbers arrive either as JSON numbers or numeric strings.
fn serial_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// In-memory car records.
#[derive(Debug, Default)]
pub struct CarStore {
    cars: BTreeMap<u64, Car>,
}

impl CarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, serial_number: u64) -> Option<&Car> {
        self.cars.get(&serial_number)
    }

    /// Insert or replace a car.
    pub fn save(&mut self, car: Car) {
        self.cars.insert(car.serial_number, car);
    }

    /// Remove a car; returns whether it existed.
    pub fn delete(&mut self, serial_number: u64) -> bool {
        self.cars.remove(&serial_number).is_some()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}

impl Handler for CarStore {
    fn handle(&mut self, request: Value) -> Result<Outcome, HandlerError> {
        match serde_json::from_value::<Request>(request)? {
            Request::Get { serial_number } => match self.get(serial_number) {
                Some(car) => Ok(Outcome::Data(serde_json::to_value(car)?)),
                None => Ok(Outcome::NotFound),
            },
            Request::Save {
                serial_number,
                mut car_data,
            } => {
                car_data.insert("serial_number".to_string(), serial_number);
                let car: Car = serde_json::from_value(Value::Object(car_data))?;
                debug!(serial_number = car.serial_number, "Saving car");
                self.save(car);
                Ok(Outcome::Success)
            }
            Request::Delete { serial_number } => {
                let existed = self.delete(serial_number);
                debug!(serial_number, existed, "Deleted car");
                Ok(Outcome::Success)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Data(value) => value,
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_save_then_get() {
        let mut store = CarStore::new();

        let outcome = store
            .handle(json!({
                "action": "save",
                "serial_number": 7,
                "car_data": {"owner_name": "Ann"}
            }))
            .unwrap();
        assert!(matches!(outcome, Outcome::Success));

        let record = data(
            store
                .handle(json!({"action": "get", "serial_number": 7}))
                .unwrap(),
        );
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"serial_number":7,"owner_name":"Ann"}"#
        );
    }

    #[test]
    fn test_get_missing() {
        let mut store = CarStore::new();
        let outcome = store
            .handle(json!({"action": "get", "serial_number": 7}))
            .unwrap();
        assert!(matches!(outcome, Outcome::NotFound));
    }

    #[test]
    fn test_save_replaces_record() {
        let mut store = CarStore::new();
        store
            .handle(json!({
                "action": "save",
                "serial_number": 1,
                "car_data": {"owner_name": "John", "model_year": 1999}
            }))
            .unwrap();
        store
            .handle(json!({
                "action": "save",
                "serial_number": 1,
                "car_data": {"owner_name": "Claire"}
            }))
            .unwrap();

        assert_eq!(store.len(), 1);
        let car = store.get(1).unwrap();
        assert_eq!(car.owner_name.as_deref(), Some("Claire"));
        assert_eq!(car.model_year, None);
    }

    #[test]
    fn test_serial_number_in_car_data_is_overridden() {
        let mut store = CarStore::new();
        store
            .handle(json!({
                "action": "save",
                "serial_number": 5,
                "car_data": {"serial_number": 6}
            }))
            .unwrap();
        assert!(store.get(5).is_some());
        assert!(store.get(6).is_none());
    }

    #[test]
    fn test_full_record() {
        let mut store = CarStore::new();
        let car_data = json!({
            "location_center_id": 4294967295u64,
            "owner_name": "Sergey",
            "model_year": 2018,
            "code": "abc",
            "vehicle_code": "def",
            "engine__capacity": 65535,
            "engine__num_cylinders": 8,
            "fuel_figures__speed": 60,
            "fuel_figures__mpg": 31.5,
            "fuel_figures__usage_description": "Empty description.",
            "performance_figures__octane_rating": 90,
            "performance_figures__acceleration__mph": 120,
            "performance_figures__acceleration__seconds": 7.25,
            "manufacturer": "Empty manufacturer."
        });
        store
            .handle(json!({"action": "save", "serial_number": 42, "car_data": car_data}))
            .unwrap();

        let car = store.get(42).unwrap();
        assert_eq!(car.engine_capacity, Some(65535));
        assert_eq!(car.engine_num_cylinders, Some(8));
        assert_eq!(car.acceleration_seconds, Some(7.25));

        let record = data(
            store
                .handle(json!({"action": "get", "serial_number": 42}))
                .unwrap(),
        );
        assert_eq!(record["engine__capacity"], json!(65535));
        assert_eq!(record["fuel_figures__mpg"], json!(31.5));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut store = CarStore::new();
        let result = store.handle(json!({
            "action": "save",
            "serial_number": 1,
            "car_data": {"engine__num_cylinders": 256}
        }));
        assert!(result.is_err());

        let result = store.handle(json!({
            "action": "save",
            "serial_number": -1,
            "car_data": {}
        }));
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut store = CarStore::new();
        let result = store.handle(json!({
            "action": "save",
            "serial_number": 1,
            "car_data": {"color": "red"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_delete() {
        let mut store = CarStore::new();
        store
            .handle(json!({"action": "save", "serial_number": 3, "car_data": {}}))
            .unwrap();

        let outcome = store
            .handle(json!({"action": "delete", "serial_number": 3}))
            .unwrap();
        assert!(matches!(outcome, Outcome::Success));
        assert!(store.is_empty());

        // Deleting a missing car still succeeds.
        let outcome = store
            .handle(json!({"action": "delete", "serial_number": 3}))
            .unwrap();
        assert!(matches!(outcome, Outcome::Success));
    }

    #[test]
    fn test_string_serial_number() {
        let mut store = CarStore::new();
        store
            .handle(json!({"action": "save", "serial_number": "12", "car_data": {}}))
            .unwrap();
        assert!(store.get(12).is_some());

        let outcome = store
            .handle(json!({"action": "get", "serial_number": " 12 "}))
            .unwrap();
        assert!(matches!(outcome, Outcome::Data(_)));
    }

    #[test]
    fn test_bad_requests() {
        let mut store = CarStore::new();
        assert!(store.handle(json!({"action": "drop"})).is_err());
        assert!(store.handle(json!({"serial_number": 1})).is_err());
        assert!(store.handle(json!({"action": "get"})).is_err());
        assert!(store
            .handle(json!({"action": "get", "serial_number": "seven"}))
            .is_err());
        assert!(store.handle(json!([1, 2, 3])).is_err());
    }
}
