/*!
Fixtures JSON conformes aux formats échangés

- `DeviceFixture` : enregistrement tel que renvoyé par `GET /get-devices`
- `ReadingFixture` : lecture capteur telle que diffusée par le simulateur
*/

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct DeviceFixture {
    device_id: String,
    device_type: String,
    location: String,
    mac_address: String,
    ip_address: String,
    is_registered: bool,
    owner: String,
    last_active: i64,
    timestamp_as_string: bool,
}

impl DeviceFixture {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type: "sensor".to_string(),
            location: "lab".to_string(),
            mac_address: "00:11:22:33:44:55".to_string(),
            ip_address: "192.168.1.10".to_string(),
            is_registered: true,
            owner: "0x0000000000000000000000000000000000000001".to_string(),
            last_active: 1_700_000_000,
            timestamp_as_string: false,
        }
    }

    pub fn device_type(mut self, device_type: &str) -> Self {
        self.device_type = device_type.to_string();
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.ip_address = ip.to_string();
        self
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn registered(mut self, is_registered: bool) -> Self {
        self.is_registered = is_registered;
        self
    }

    pub fn last_active(mut self, epoch_seconds: i64) -> Self {
        self.last_active = epoch_seconds;
        self
    }

    /// Timestamp encodé en string, comme les uint256 renvoyés par web3
    pub fn timestamp_as_string(mut self) -> Self {
        self.timestamp_as_string = true;
        self
    }

    pub fn build(&self) -> Value {
        let ts = if self.timestamp_as_string {
            Value::String(self.last_active.to_string())
        } else {
            Value::from(self.last_active)
        };
        json!({
            "deviceId": self.device_id,
            "deviceType": self.device_type,
            "location": self.location,
            "macAddress": self.mac_address,
            "ipAddress": self.ip_address,
            "isRegistered": self.is_registered,
            "owner": self.owner,
            "lastActiveTimestamp": ts,
        })
    }
}

/// `n` devices enregistrés `{prefix}-1 .. {prefix}-n`, lieux et IP distincts
pub fn fleet(prefix: &str, n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            DeviceFixture::new(&format!("{prefix}-{i}"))
                .location(&format!("room-{i}"))
                .ip(&format!("192.168.1.{}", 10 + i))
                .build()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReadingFixture {
    device_id: String,
    temperature: f64,
    humidity: f64,
    battery: f64,
    motion_detected: bool,
    fault: bool,
    last_active: DateTime<Utc>,
}

impl ReadingFixture {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            temperature: 21.5,
            humidity: 45.0,
            battery: 90.0,
            motion_detected: false,
            fault: false,
            last_active: Utc::now(),
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn battery(mut self, battery: f64) -> Self {
        self.battery = battery;
        self
    }

    pub fn fault(mut self, fault: bool) -> Self {
        self.fault = fault;
        self
    }

    /// Horodatage en secondes epoch ; hors plage => epoch 0
    pub fn at(mut self, epoch_seconds: i64) -> Self {
        self.last_active = DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_default();
        self
    }

    pub fn build(&self) -> Value {
        json!({
            "deviceId": self.device_id,
            "temperature": self.temperature,
            "humidity": self.humidity,
            "battery": self.battery,
            "motionDetected": self.motion_detected,
            "fault": self.fault,
            "lastActive": self.last_active.to_rfc3339(),
        })
    }
}
