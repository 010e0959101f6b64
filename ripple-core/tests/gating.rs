//! Gates driven by a real async scheduler.
//!
//! The gate's tick callback spawns a timer on a tokio `LocalSet`; when the
//! timer fires it releases the held computation, which then sees only the
//! latest input. This is the shape of a debounce modifier.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use ripple_core::{Builder, Gate, Signal};
use tokio::task::{self, LocalSet};
use tokio::time::sleep;

/// Gate that releases held computations `delay` after the first hold, folding
/// every hold in between into one release.
fn debounce(delay: Duration) -> Gate {
    Gate::new(move |go| {
        let scheduled = Rc::new(Cell::new(false));
        move || {
            if scheduled.replace(true) {
                return;
            }
            let (go, scheduled) = (go.clone(), Rc::clone(&scheduled));
            task::spawn_local(async move {
                sleep(delay).await;
                scheduled.set(false);
                go.go().unwrap();
            });
        }
    })
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn debounced_computation_sees_only_the_last_write() {
    LocalSet::new()
        .run_until(async {
            let gate = debounce(Duration::from_millis(50));
            let query = Signal::new(String::new());
            let searches = Rc::new(RefCell::new(Vec::new()));

            let _search = Builder::new()
                .gated(&gate)
                .effect({
                    let (query, searches) = (query.clone(), Rc::clone(&searches));
                    move || {
                        searches.borrow_mut().push(query.get());
                        Ok(())
                    }
                })
                .unwrap();

            for text in ["r", "ri", "rip"] {
                query.set(text.to_string()).unwrap();
                sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(*searches.borrow(), [""]);
            assert_eq!(gate.held_count(), 1);

            sleep(Duration::from_millis(100)).await;
            assert_eq!(*searches.borrow(), ["", "rip"]);
            assert_eq!(gate.held_count(), 0);

            // The next burst schedules a fresh release.
            query.set("ripple".to_string()).unwrap();
            sleep(Duration::from_millis(100)).await;
            assert_eq!(*searches.borrow(), ["", "rip", "ripple"]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn ungated_computations_are_not_delayed() {
    LocalSet::new()
        .run_until(async {
            let gate = debounce(Duration::from_millis(50));
            let input = Signal::new(0);
            let gated_seen = Rc::new(Cell::new(0));
            let direct_seen = Rc::new(Cell::new(0));

            let _gated = Builder::new()
                .gated(&gate)
                .effect({
                    let (input, seen) = (input.clone(), Rc::clone(&gated_seen));
                    move || {
                        seen.set(input.get());
                        Ok(())
                    }
                })
                .unwrap();
            let _direct = Builder::new()
                .effect({
                    let (input, seen) = (input.clone(), Rc::clone(&direct_seen));
                    move || {
                        seen.set(input.get());
                        Ok(())
                    }
                })
                .unwrap();

            input.set(7).unwrap();
            assert_eq!((gated_seen.get(), direct_seen.get()), (0, 7));

            sleep(Duration::from_millis(60)).await;
            assert_eq!((gated_seen.get(), direct_seen.get()), (7, 7));
        })
        .await;
}
