mod common;

use std::sync::Arc;

use common::{MockObject, MockRuntime};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use updater_bridge::{PinError, ProxyUpdater};

type Updater = ProxyUpdater<MockRuntime>;

#[test]
fn bind_takes_exactly_one_pin() {
    let object = MockObject::succeeding();
    let updater = MockRuntime::bind(&object).unwrap();
    assert!(updater.is_bound());
    assert_eq!(object.pins(), 1);

    drop(updater);
    assert_eq!(object.pins(), 0);
}

#[test]
fn default_updater_holds_no_pin() {
    let updater = Updater::default();
    assert!(!updater.is_bound());
    assert!(updater.handle().is_none());
    drop(updater);
}

#[test]
fn copies_take_independent_pins() {
    let object = MockObject::succeeding();
    let first = MockRuntime::bind(&object).unwrap();
    let second = first.try_clone().unwrap();
    let third = second.try_clone().unwrap();
    assert_eq!(object.pins(), 3);

    drop(second);
    assert_eq!(object.pins(), 2);
    drop(first);
    assert_eq!(object.pins(), 1);
    assert!(third.is_bound());
    drop(third);
    assert_eq!(object.pins(), 0);
}

#[test]
fn copying_an_empty_updater_yields_an_empty_updater() {
    let copy = Updater::empty().try_clone().unwrap();
    assert!(!copy.is_bound());
}

#[test]
fn copy_on_another_thread_uses_that_threads_context() {
    let object = MockObject::succeeding();
    let updater = MockRuntime::bind(&object).unwrap();

    // the mock asserts the access context belongs to the thread using it
    let copy = std::thread::scope(|scope| scope.spawn(|| updater.try_clone().unwrap()).join().unwrap());
    assert_eq!(object.pins(), 2);

    std::thread::scope(|scope| {
        scope.spawn(move || drop(copy));
    });
    assert_eq!(object.pins(), 1);
}

#[test]
fn assignment_moves_the_pin_to_the_new_target() {
    let a = MockObject::succeeding();
    let b = MockObject::succeeding();
    let mut target = MockRuntime::bind(&a).unwrap();
    let source = MockRuntime::bind(&b).unwrap();

    target.assign_from(&source).unwrap();
    assert_eq!(a.pins(), 0);
    assert_eq!(b.pins(), 2);
}

#[test]
fn assigning_an_empty_updater_releases_the_pin() {
    let object = MockObject::succeeding();
    let mut updater = MockRuntime::bind(&object).unwrap();
    updater.assign_from(&Updater::empty()).unwrap();
    assert!(!updater.is_bound());
    assert_eq!(object.pins(), 0);
}

#[test]
fn assigning_from_a_copy_of_the_same_object_keeps_the_count() {
    let object = MockObject::succeeding();
    let mut updater = MockRuntime::bind(&object).unwrap();
    let same = updater.try_clone().unwrap();
    assert_eq!(object.pins(), 2);

    updater.assign_from(&same).unwrap();
    assert_eq!(object.pins(), 2);
    drop(same);
    assert_eq!(object.pins(), 1);
}

#[test]
fn failed_bind_produces_no_updater() {
    let object = MockObject::succeeding();
    object.refuse_pins(true);
    let err = MockRuntime::bind(&object).unwrap_err();
    assert_eq!(err, PinError::new("pin table exhausted"));
    assert_eq!(object.pins(), 0);
}

#[test]
fn failed_copy_is_reported_not_degraded() {
    let object = MockObject::succeeding();
    let updater = MockRuntime::bind(&object).unwrap();
    object.refuse_pins(true);

    assert!(updater.try_clone().is_err());
    assert_eq!(object.pins(), 1);
}

#[test]
fn failed_assignment_leaves_target_untouched() {
    let kept = MockObject::succeeding();
    let refused = MockObject::succeeding();
    let mut target = MockRuntime::bind(&kept).unwrap();
    let source = MockRuntime::bind(&refused).unwrap();
    refused.refuse_pins(true);

    assert!(target.assign_from(&source).is_err());
    assert!(target.is_bound());
    assert_eq!(kept.pins(), 1);
    assert_eq!(refused.pins(), 1);
}

#[test]
fn reset_is_idempotent() {
    let object = MockObject::succeeding();
    let mut updater = MockRuntime::bind(&object).unwrap();
    updater.reset();
    updater.reset();
    assert_eq!(object.pins(), 0);
    drop(updater);
    assert_eq!(object.pins(), 0);
}

#[derive(Debug, Clone)]
enum Op {
    Bind { slot: usize, object: usize },
    Copy { from: usize, to: usize },
    Assign { from: usize, to: usize },
    Drop { slot: usize },
}

const SLOTS: usize = 4;
const OBJECTS: usize = 2;

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SLOTS, 0..OBJECTS).prop_map(|(slot, object)| Op::Bind { slot, object }),
        (0..SLOTS, 0..SLOTS).prop_map(|(from, to)| Op::Copy { from, to }),
        (0..SLOTS, 0..SLOTS).prop_map(|(from, to)| Op::Assign { from, to }),
        (0..SLOTS).prop_map(|slot| Op::Drop { slot }),
    ]
}

/// Returns `(&mut slots[to], &slots[from])` for `to != from`.
fn target_and_source(slots: &mut [Updater], to: usize, from: usize) -> (&mut Updater, &Updater) {
    if to < from {
        let (left, right) = slots.split_at_mut(from);
        (&mut left[to], &right[0])
    } else {
        let (left, right) = slots.split_at_mut(to);
        (&mut right[0], &left[from])
    }
}

proptest! {
    #[test]
    fn live_pins_match_live_updaters(ops in prop::collection::vec(op(), 1..40)) {
        let objects: Vec<Arc<MockObject>> = (0..OBJECTS).map(|_| MockObject::succeeding()).collect();
        let mut slots: Vec<Updater> = (0..SLOTS).map(|_| Updater::empty()).collect();
        let mut model: Vec<Option<usize>> = vec![None; SLOTS];

        for op in ops {
            match op {
                Op::Bind { slot, object } => {
                    slots[slot] = MockRuntime::bind(&objects[object]).unwrap();
                    model[slot] = Some(object);
                }
                Op::Copy { from, to } => {
                    let copy = slots[from].try_clone().unwrap();
                    slots[to] = copy;
                    model[to] = model[from];
                }
                Op::Assign { from, to } => {
                    if from != to {
                        let (target, source) = target_and_source(&mut slots, to, from);
                        target.assign_from(source).unwrap();
                        model[to] = model[from];
                    }
                }
                Op::Drop { slot } => {
                    drop(std::mem::take(&mut slots[slot]));
                    model[slot] = None;
                }
            }

            for (index, object) in objects.iter().enumerate() {
                let expected = model.iter().filter(|bound| **bound == Some(index)).count();
                prop_assert_eq!(object.pins(), expected);
            }
        }

        drop(slots);
        for object in &objects {
            prop_assert_eq!(object.pins(), 0);
        }
    }
}
