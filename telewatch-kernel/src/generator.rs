/**
 * GÉNÉRATEUR TÉLÉMÉTRIE - Une lecture capteur simulée par tick
 *
 * FONCTIONNEMENT :
 * - 60% du temps (registered_bias) : un device du snapshot registre, tiré uniformément
 * - sinon : un slot synthétique device_1..device_N (devices non enregistrés / rogue)
 * - Valeurs : température 15-50°C, humidité 30-90%, batterie 10-100%,
 *   mouvement 30%, défaut 10%
 *
 * Calcul pur, pas de chemin d'erreur : c'est le hub qui décide de la diffusion.
 */

use crate::config::GeneratorConf;
use crate::models::TelemetryReading;
use rand::seq::SliceRandom;
use rand::Rng;
use time::OffsetDateTime;

const MOTION_PROBABILITY: f64 = 0.3;
const FAULT_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct TelemetryGenerator {
    synthetic_pool: u32,
    registered_bias: f64,
}

impl Default for TelemetryGenerator {
    fn default() -> Self {
        Self::new(&GeneratorConf::default())
    }
}

impl TelemetryGenerator {
    pub fn new(conf: &GeneratorConf) -> Self {
        Self {
            synthetic_pool: conf.synthetic_pool.max(1),
            registered_bias: if conf.registered_bias.is_nan() { 0.6 } else { conf.registered_bias.clamp(0.0, 1.0) },
        }
    }

    pub fn produce(&self, registered: &[String]) -> TelemetryReading {
        self.produce_with(&mut rand::thread_rng(), registered)
    }

    pub fn produce_with<R: Rng>(&self, rng: &mut R, registered: &[String]) -> TelemetryReading {
        let device_id = match registered.choose(rng) {
            Some(id) if rng.gen_bool(self.registered_bias) => id.clone(),
            _ => format!("device_{}", rng.gen_range(1..=self.synthetic_pool)),
        };

        TelemetryReading {
            device_id,
            temperature: round2(rng.gen_range(15.0..50.0)),
            humidity: round2(rng.gen_range(30.0..90.0)),
            battery: rng.gen_range(10.0_f64..100.0).round(),
            motion_detected: rng.gen_bool(MOTION_PROBABILITY),
            fault: rng.gen_bool(FAULT_PROBABILITY),
            observed_at: OffsetDateTime::now_utc(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn registered() -> Vec<String> {
        vec!["reg-a".into(), "reg-b".into(), "reg-c".into()]
    }

    #[test]
    fn test_values_stay_in_range() {
        let gen = TelemetryGenerator::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let r = gen.produce_with(&mut rng, &registered());
            assert!((15.0..=50.0).contains(&r.temperature), "temperature {}", r.temperature);
            assert!((30.0..=90.0).contains(&r.humidity), "humidity {}", r.humidity);
            assert!((10.0..=100.0).contains(&r.battery), "battery {}", r.battery);
            assert_eq!(r.battery.fract(), 0.0);
            assert!(((r.temperature * 100.0).round() - r.temperature * 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_registry_uses_synthetic_pool() {
        let gen = TelemetryGenerator::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let id = gen.produce_with(&mut rng, &[]).device_id;
            let slot: u32 = id.strip_prefix("device_").unwrap().parse().unwrap();
            assert!((1..=10).contains(&slot));
        }
    }

    #[test]
    fn test_registered_bias_roughly_sixty_percent() {
        let gen = TelemetryGenerator::default();
        let mut rng = StdRng::seed_from_u64(42);
        let ids = registered();
        let n = 10_000;
        let hits = (0..n)
            .filter(|_| ids.contains(&gen.produce_with(&mut rng, &ids).device_id))
            .count();
        let ratio = hits as f64 / n as f64;
        assert!((0.56..0.64).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn test_full_bias_always_picks_registered() {
        let gen = TelemetryGenerator::new(&GeneratorConf { synthetic_pool: 3, registered_bias: 1.0 });
        let mut rng = StdRng::seed_from_u64(3);
        let ids = registered();
        assert!((0..200).all(|_| ids.contains(&gen.produce_with(&mut rng, &ids).device_id)));
    }

    #[test]
    fn test_flags_follow_probabilities() {
        let gen = TelemetryGenerator::default();
        let mut rng = StdRng::seed_from_u64(99);
        let n = 10_000;
        let readings: Vec<_> = (0..n).map(|_| gen.produce_with(&mut rng, &[])).collect();
        let motion = readings.iter().filter(|r| r.motion_detected).count() as f64 / n as f64;
        let fault = readings.iter().filter(|r| r.fault).count() as f64 / n as f64;
        assert!((0.26..0.34).contains(&motion), "motion {motion}");
        assert!((0.07..0.13).contains(&fault), "fault {fault}");
    }
}
