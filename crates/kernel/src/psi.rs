//! Parser for `/proc/pressure/memory`.
//!
//! ```text
//! some avg10=0.31 avg60=0.12 avg300=0.02 total=1234567
//! full avg10=0.00 avg60=0.00 avg300=0.00 total=45678
//! ```

use reclaimd_core::MemoryPressure;

pub fn parse_memory_pressure(content: &str) -> Result<MemoryPressure, String> {
    let mut some = None;
    let mut full = None;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let kind = fields.next();
        let avg10 = fields
            .find_map(|f| f.strip_prefix("avg10="))
            .map(|v| v.parse::<f64>().map_err(|_| format!("bad avg10 value: {v}")))
            .transpose()?;

        match (kind, avg10) {
            (Some("some"), Some(v)) => some = Some(v),
            (Some("full"), Some(v)) => full = Some(v),
            _ => {}
        }
    }

    // Older kernels only report the "some" line
    let some_avg10 = some.ok_or("missing 'some' line")?;
    Ok(MemoryPressure {
        some_avg10,
        full_avg10: full.unwrap_or(0.0),
    })
}
