//! RFID portal gateway: correlates pallet and operator tag reads from a
//! dock-door reader, enriches them against the plant data API and fans the
//! outcomes out to WebSocket subscribers.

pub mod reader_logic;
