//! Configuration system.
//!
//! Loads universe configuration from JSON strings/files (file IO left to app).
//! Every field has a default, so a config file only needs the values it changes.

use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// Root configuration for a universe server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Listen address, e.g. `127.0.0.1:5505`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Lower clamp on the simulated step, in seconds. The tick loop sleeps
    /// when a tick finishes faster than this.
    #[serde(default = "default_physics_frametime")]
    pub min_physics_frametime: f64,
    /// Upper clamp on the simulated step, in seconds.
    #[serde(default = "default_physics_frametime")]
    pub max_physics_frametime: f64,
    /// Period of visual data broadcasts, in seconds.
    #[serde(default = "default_vis_frametime")]
    pub min_vis_frametime: f64,
    /// Simulated seconds per wall-clock second.
    #[serde(default = "default_simulation_rate")]
    pub simulation_rate: f64,
    /// Sleep out the remainder of `min_physics_frametime` after each tick.
    #[serde(default = "default_true")]
    pub realtime: bool,

    #[serde(default = "default_gravitational_constant")]
    pub gravitational_constant: f64,
    /// Default propagation speed of beams, m/s.
    #[serde(default = "default_speed_of_light")]
    pub speed_of_light: f64,
    /// Bodies with `G·m/r` at or below this are not attractors.
    #[serde(default = "default_gravity_magnitude_cutoff")]
    pub gravity_magnitude_cutoff: f64,
    /// Collisions moving less energy than this (J) are ignored.
    #[serde(default = "default_collision_energy_cutoff")]
    pub collision_energy_cutoff: f64,
    /// Wavefront energy density (J/m²) below which a beam is spent.
    #[serde(default = "default_beam_energy_cutoff")]
    pub beam_energy_cutoff: f64,
    /// Radiated power density (W/m²) at which radiation starts to hurt.
    #[serde(default = "default_radiation_energy_cutoff")]
    pub radiation_energy_cutoff: f64,
    /// Relative jitter applied to received spectra.
    #[serde(default = "default_spectrum_slush_range")]
    pub spectrum_slush_range: f64,
    /// Fraction of current health an impact may carry without doing damage.
    #[serde(default = "default_health_damage_threshold")]
    pub health_damage_threshold: f64,
    /// Hit points per kilogram for bodies without a remote owner.
    #[serde(default = "default_health_mass_scale")]
    pub health_mass_scale: f64,
    /// `(2r/d)²` below which a body is too small to be worth sending as vis data.
    #[serde(default = "default_visual_acuity")]
    pub visual_acuity: f64,
    #[serde(default = "default_max_collision_rounds")]
    pub max_simultaneous_collision_rounds: u32,
    /// Simulated seconds an active scan query waits for its answer.
    #[serde(default = "default_scan_query_timeout")]
    pub scan_query_timeout: f64,
    /// Largest random step between consecutive physics ids. 1 gives sequential ids.
    #[serde(default = "default_id_rand_max")]
    pub id_rand_max: i64,
    /// Frames longer than this are skipped without being decoded.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_server_addr() -> String {
    "127.0.0.1:5505".to_string()
}

fn default_physics_frametime() -> f64 {
    0.002
}

fn default_vis_frametime() -> f64 {
    0.1
}

fn default_simulation_rate() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_gravitational_constant() -> f64 {
    6.67384e-11
}

fn default_speed_of_light() -> f64 {
    299_792_458.0
}

fn default_gravity_magnitude_cutoff() -> f64 {
    0.01
}

fn default_collision_energy_cutoff() -> f64 {
    1e-9
}

fn default_beam_energy_cutoff() -> f64 {
    1e-10
}

fn default_radiation_energy_cutoff() -> f64 {
    1.5e4
}

fn default_spectrum_slush_range() -> f64 {
    0.01
}

fn default_health_damage_threshold() -> f64 {
    0.1
}

fn default_health_mass_scale() -> f64 {
    1e6
}

fn default_visual_acuity() -> f64 {
    4e-7
}

fn default_max_collision_rounds() -> u32 {
    100
}

fn default_scan_query_timeout() -> f64 {
    60.0
}

fn default_id_rand_max() -> i64 {
    1
}

fn default_max_frame_len() -> usize {
    1 << 20
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            min_physics_frametime: default_physics_frametime(),
            max_physics_frametime: default_physics_frametime(),
            min_vis_frametime: default_vis_frametime(),
            simulation_rate: default_simulation_rate(),
            realtime: true,
            gravitational_constant: default_gravitational_constant(),
            speed_of_light: default_speed_of_light(),
            gravity_magnitude_cutoff: default_gravity_magnitude_cutoff(),
            collision_energy_cutoff: default_collision_energy_cutoff(),
            beam_energy_cutoff: default_beam_energy_cutoff(),
            radiation_energy_cutoff: default_radiation_energy_cutoff(),
            spectrum_slush_range: default_spectrum_slush_range(),
            health_damage_threshold: default_health_damage_threshold(),
            health_mass_scale: default_health_mass_scale(),
            visual_acuity: default_visual_acuity(),
            max_simultaneous_collision_rounds: default_max_collision_rounds(),
            scan_query_timeout: default_scan_query_timeout(),
            id_rand_max: default_id_rand_max(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl UniverseConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects combinations the tick loop cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, v) in [
            ("min_physics_frametime", self.min_physics_frametime),
            ("max_physics_frametime", self.max_physics_frametime),
            ("min_vis_frametime", self.min_vis_frametime),
            ("simulation_rate", self.simulation_rate),
            ("scan_query_timeout", self.scan_query_timeout),
        ] {
            ensure!(v.is_finite(), "{name} must be finite, got {v}");
        }
        ensure!(
            self.min_physics_frametime > 0.0 && self.max_physics_frametime > 0.0,
            "physics frametimes must be positive"
        );
        ensure!(
            self.min_physics_frametime <= self.max_physics_frametime,
            "min_physics_frametime ({}) exceeds max_physics_frametime ({})",
            self.min_physics_frametime,
            self.max_physics_frametime
        );
        ensure!(self.min_vis_frametime > 0.0, "min_vis_frametime must be positive");
        ensure!(self.simulation_rate > 0.0, "simulation_rate must be positive");
        ensure!(self.scan_query_timeout > 0.0, "scan_query_timeout must be positive");
        ensure!(self.id_rand_max >= 1, "id_rand_max must be at least 1");
        ensure!(self.max_frame_len > 0, "max_frame_len must be positive");
        Ok(())
    }

    /// Clamps a measured wall-clock frame duration into the allowed step range.
    pub fn clamp_frametime(&self, elapsed: f64) -> f64 {
        elapsed.clamp(self.min_physics_frametime, self.max_physics_frametime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = UniverseConfig::from_json_str(r#"{ "server_addr": "0.0.0.0:6000", "simulation_rate": 2.0 }"#)
            .unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:6000");
        assert_eq!(cfg.simulation_rate, 2.0);
        assert_eq!(cfg.max_simultaneous_collision_rounds, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_frametimes_are_rejected() {
        let cfg = UniverseConfig {
            min_physics_frametime: 0.01,
            max_physics_frametime: 0.001,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_finite_timings_are_rejected() {
        let cases = [
            UniverseConfig {
                max_physics_frametime: f64::INFINITY,
                ..Default::default()
            },
            UniverseConfig {
                min_physics_frametime: f64::NAN,
                ..Default::default()
            },
            UniverseConfig {
                min_vis_frametime: f64::INFINITY,
                ..Default::default()
            },
            UniverseConfig {
                simulation_rate: f64::INFINITY,
                ..Default::default()
            },
            UniverseConfig {
                scan_query_timeout: f64::NAN,
                ..Default::default()
            },
            UniverseConfig {
                scan_query_timeout: 0.0,
                ..Default::default()
            },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "accepted {cfg:?}");
        }
        assert!(UniverseConfig::default().validate().is_ok());
    }

    #[test]
    fn frametime_clamps_both_ways() {
        let cfg = UniverseConfig {
            min_physics_frametime: 0.001,
            max_physics_frametime: 0.01,
            ..Default::default()
        };
        assert_eq!(cfg.clamp_frametime(0.0), 0.001);
        assert_eq!(cfg.clamp_frametime(0.005), 0.005);
        assert_eq!(cfg.clamp_frametime(1.0), 0.01);
    }
}
