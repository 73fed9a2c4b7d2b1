#![allow(unused_parens, unused_labels, unused_mut, unused_braces, unreachable_code)]
pub struct Reading(pub i32);
pub fn scale(a: i32, b: i32) -> i32 {
    (if crate::__switchboard::is_active(0) {
        a - b * 2
    } else {
        a + (if crate::__switchboard::is_active(1) { b / 2 } else { b * 2 })
    })
}
pub fn tally(values: &[i32]) -> i32 {
    #[cfg_attr(any(), switchboard_marker(id = 0, engine = "default_init", was_mut = false))]
    let mut total: i32 = ::core::default::Default::default();
    if crate::__switchboard::is_active(2) {} else {
        total = values.len() as i32;
    }
    total
}
pub fn bump_all(values: &mut Vec<i32>) {
    if crate::__switchboard::is_active(3) {} else {
        values
            .iter_mut()
            .for_each(|v| '__switchboard_marker_1: {
                if crate::__switchboard::is_active(4) {} else {
                    (if crate::__switchboard::is_active(5) { *v -= 1 } else { *v += 1 });
                }
            });
    }
}
pub fn read(flag: bool, log: &mut Vec<i32>) -> i32 {
    let reading: Reading;
    if flag {
        reading = Reading(1);
    } else {
        reading = Reading(2);
    }
    if crate::__switchboard::is_active(6) {} else {
        log.push(reading.0);
    }
    (if crate::__switchboard::is_active(7) { reading.0 / 10 } else { reading.0 * 10 })
}
#[cfg(test)]
mod tests {
    use super::*;
    use mutation_switchboard::collector::{COVERAGE_KEY, MUTANT_COVERED_KEY};
    use mutation_switchboard::runtime::{subscribe, SurfaceSlot};
    use mutation_switchboard::{Collector, DataSink, SessionConfig, TestSet};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    const SURFACE: &str = "gauges";
    static SERIAL: Mutex<()> = parking_lot::const_mutex(());
    type Observation = (i32, i32, Vec<i32>, i32, Vec<i32>);
    #[derive(Default)]
    struct Sent(Vec<(String, String)>);
    impl DataSink for Sent {
        fn send_data(&mut self, _test_id: &str, key: &str, value: &str) {
            self.0.push((key.to_string(), value.to_string()));
        }
    }
    fn observe() -> Observation {
        let mut values = vec![1, 2];
        bump_all(&mut values);
        let mut log = Vec::new();
        let reading = read(true, &mut log);
        (scale(1, 3), tally(&[4, 5, 6]), values, reading, log)
    }
    fn one_case(config: SessionConfig) -> (Observation, Vec<(String, String)>) {
        let _serial = SERIAL.lock();
        let mut collector = Collector::new(Sent::default());
        collector.test_session_start(&config.to_document().unwrap()).unwrap();
        collector.test_case_start("observe");
        let observed = observe();
        collector.test_case_end("observe");
        collector.test_session_end();
        (observed, collector.into_sink().0)
    }
    fn with_mutant(id: u32) -> (Observation, Vec<(String, String)>) {
        let map = BTreeMap::from([(id, TestSet::Everything)]);
        one_case(SessionConfig::new(false, Some(&map), SURFACE, None))
    }
    fn original() -> Observation {
        (7, 3, vec![2, 3], 10, vec![1])
    }
    #[test]
    fn test_no_active_mutant_runs_the_original() {
        let (observed, _) = one_case(SessionConfig::new(false, None, SURFACE, None));
        assert_eq!(observed, original());
    }
    #[test]
    fn test_each_mutant_changes_only_its_site() {
        let expected: [(u32, Observation); 8] = [
            (0, (-5, 3, vec![2, 3], 10, vec![1])),
            (1, (2, 3, vec![2, 3], 10, vec![1])),
            (2, (7, 0, vec![2, 3], 10, vec![1])),
            (3, (7, 3, vec![1, 2], 10, vec![1])),
            (4, (7, 3, vec![1, 2], 10, vec![1])),
            (5, (7, 3, vec![0, 1], 10, vec![1])),
            (6, (7, 3, vec![2, 3], 10, vec![])),
            (7, (7, 3, vec![2, 3], 0, vec![1])),
        ];
        for (id, outcome) in expected {
            let (observed, sent) = with_mutant(id);
            assert_eq!(observed, outcome, "mutant {id}");
            assert_eq!(
                sent, vec![(MUTANT_COVERED_KEY.to_string(), "true".to_string())],
                "mutant {id}"
            );
        }
    }
    #[test]
    fn test_coverage_lists_guards_in_reach_order() {
        let (observed, sent) = one_case(SessionConfig::new(true, None, SURFACE, None));
        assert_eq!(observed, original());
        assert_eq!(sent, vec![(COVERAGE_KEY.to_string(), "3,4,5,6,7,0,1,2;".to_string())]);
    }
    #[test]
    fn test_control_module_registers_its_surface() {
        one_case(SessionConfig::new(false, None, SURFACE, None));
        let _serial = SERIAL.lock();
        let slot = SurfaceSlot::new(SURFACE);
        assert!(subscribe(&slot));
        assert!(slot.control().is_some());
    }
}
#[doc(hidden)]
#[allow(dead_code)]
pub(crate) mod __switchboard {
    static CONTROL: ::mutation_switchboard::runtime::MutantControl = ::mutation_switchboard::runtime::MutantControl::new();
    static REGISTER: ::std::sync::Once = ::std::sync::Once::new();
    #[inline]
    pub fn is_active(id: u32) -> bool {
        REGISTER
            .call_once(|| ::mutation_switchboard::runtime::register_surface("gauges", &CONTROL));
        CONTROL.check(id)
    }
}
