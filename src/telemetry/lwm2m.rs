//! LwM2M object identifiers used as SenML base names.

use std::fmt;

/// Application-specific LwM2M objects understood by the ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectId {
    /// Location fix.
    Geolocation = 14201,
    /// Battery and power supply.
    BatteryAndPower = 14202,
    /// Cellular connection information.
    ConnectionInformation = 14203,
    /// Firmware and hardware details.
    DeviceInformation = 14204,
    /// Temperature, humidity, pressure.
    Environment = 14205,
    /// Solar charger.
    SolarCharge = 14210,
    /// Button press events.
    ButtonPress = 14220,
    /// Sea water level.
    SeaWaterLevel = 14230,
}

impl ObjectId {
    /// Parse an object identifier.
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            14201 => Some(Self::Geolocation),
            14202 => Some(Self::BatteryAndPower),
            14203 => Some(Self::ConnectionInformation),
            14204 => Some(Self::DeviceInformation),
            14205 => Some(Self::Environment),
            14210 => Some(Self::SolarCharge),
            14220 => Some(Self::ButtonPress),
            14230 => Some(Self::SeaWaterLevel),
            _ => None,
        }
    }

    /// Numeric identifier.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// SenML base name for an object instance, e.g. `"14201/0/"`.
    pub fn base_name(self, instance: u16) -> String {
        format!("{}/{}/", self.as_u16(), instance)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Resource identifiers of the geolocation object (14201).
pub mod geolocation {
    /// Latitude in degrees.
    pub const LATITUDE: &str = "0";
    /// Longitude in degrees.
    pub const LONGITUDE: &str = "1";
    /// Altitude in meters.
    pub const ALTITUDE: &str = "2";
    /// Radius of uncertainty in meters.
    pub const ACCURACY: &str = "3";
    /// Speed in m/s.
    pub const SPEED: &str = "4";
    /// Heading in degrees.
    pub const HEADING: &str = "5";
    /// Fix source, e.g. `"GNSS"` or `"Fixed"`.
    pub const SOURCE: &str = "6";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        for id in [14201, 14202, 14203, 14204, 14205, 14210, 14220, 14230] {
            assert_eq!(ObjectId::from_u16(id).map(ObjectId::as_u16), Some(id));
        }
        assert_eq!(ObjectId::from_u16(3303), None);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(ObjectId::Geolocation.base_name(0), "14201/0/");
        assert_eq!(ObjectId::Environment.base_name(2), "14205/2/");
    }
}
