// src/analysis/oplog.rs — Transistor bias table from the simulator console
//
// ngspice `show m : vgs vth` prints one table per device group:
//
//     device        m1        m2
//      model      nmos      pmos
//        vgs       0.9      -0.9
//        vth      0.45     -0.45
//
// Rows are collected across tables and zipped by position.

use crate::core::types::DeviceBias;

/// Every device with both a `vgs` and a `vth` value in `log`. Devices whose
/// values are missing or unparseable are dropped.
pub fn parse_bias(log: &str) -> Vec<DeviceBias> {
    let mut devices: Vec<&str> = Vec::new();
    let mut vgs: Vec<Option<f64>> = Vec::new();
    let mut vth: Vec<Option<f64>> = Vec::new();

    for line in log.lines() {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            continue;
        };
        match head.to_ascii_lowercase().as_str() {
            "device" => devices.extend(parts),
            "vgs" => vgs.extend(parts.map(|v| v.parse::<f64>().ok())),
            "vth" => vth.extend(parts.map(|v| v.parse::<f64>().ok())),
            _ => {}
        }
    }

    devices
        .into_iter()
        .zip(vgs)
        .zip(vth)
        .filter_map(|((name, vgs), vth)| {
            Some(DeviceBias {
                name: name.to_string(),
                vgs: vgs.filter(|v| v.is_finite())?,
                vth: vth.filter(|v| v.is_finite())?,
            })
        })
        .collect()
}

/// Smallest gate overdrive across devices; `None` when nothing was reported.
pub fn min_margin(bias: &[DeviceBias]) -> Option<f64> {
    bias.iter().map(DeviceBias::margin).reduce(f64::min)
}
