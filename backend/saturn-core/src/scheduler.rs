//! Event scheduler for the hardware-simulation loop
//!
//! All hardware units advance in lockstep with a single monotonically increasing cycle counter.
//! Future work (phase transitions, timer expirations, deferred VDP1 command processing) is
//! registered here as events keyed by an absolute deadline in cycles; the main loop repeatedly
//! advances to the next due event and dispatches it.

use bincode::{Decode, Encode};
use jsaturn_proc_macros::EnumAll;
use std::array;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, EnumAll)]
pub enum SchedulerEvent {
    /// VDP horizontal/vertical phase transition (self re-arming)
    VdpPhase = 0,
    /// VDP1 command processor resumption after exhausting its cycle budget
    Vdp1Commands,
    /// SCU Timer 1 expiration, armed with the reload value at HBlank-IN
    ScuTimer1,
    Dummy,
}

impl SchedulerEvent {
    fn as_bit(self) -> u32 {
        1 << (self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct HeapEntry {
    event: SchedulerEvent,
    cycles: u64,
    seq: u64,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Events scheduled for the same cycle fire in scheduling order
        self.cycles.cmp(&other.cycles).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Scheduler {
    heap: [HeapEntry; SchedulerEvent::ALL.len()],
    len: usize,
    scheduled_bits: u32,
    cycles: u64,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        // Initialize with a dummy event to avoid ever needing to check if the heap is empty
        Self {
            heap: array::from_fn(|_| HeapEntry {
                event: SchedulerEvent::Dummy,
                cycles: u64::MAX,
                seq: 0,
            }),
            len: 1,
            scheduled_bits: SchedulerEvent::Dummy.as_bit(),
            cycles: 0,
            next_seq: 1,
        }
    }

    /// Current cycle count. Never exceeds the deadline of the earliest pending event.
    pub fn current(&self) -> u64 {
        self.cycles
    }

    pub fn schedule_from_now(&mut self, event: SchedulerEvent, delta_cycles: u64) {
        self.schedule_at(event, self.cycles + delta_cycles);
    }

    // Insert if event is not present, update deadline if it is present
    pub fn schedule_at(&mut self, event: SchedulerEvent, deadline: u64) {
        log::trace!("Scheduling event {event:?} at cycles {deadline}");

        let seq = self.next_seq;
        self.next_seq += 1;

        if self.scheduled_bits & event.as_bit() != 0 {
            for i in 0..self.len {
                if self.heap[i].event != event {
                    continue;
                }

                let old = self.heap[i];
                self.heap[i].cycles = deadline;
                self.heap[i].seq = seq;

                match deadline.cmp(&old.cycles) {
                    Ordering::Less => self.heap_up(i),
                    Ordering::Greater => self.heap_down(i),
                    Ordering::Equal => self.heap_down(i),
                }

                return;
            }
        }
        self.scheduled_bits |= event.as_bit();

        self.heap[self.len] = HeapEntry { event, cycles: deadline, seq };
        self.len += 1;
        self.heap_up(self.len - 1);
    }

    pub fn cancel(&mut self, event: SchedulerEvent) {
        log::trace!("Cancelling event {event:?}");

        if self.scheduled_bits & event.as_bit() == 0 {
            return;
        }
        self.scheduled_bits &= !event.as_bit();

        for i in 0..self.len {
            if self.heap[i].event == event {
                let old = self.heap[i];
                self.heap.swap(i, self.len - 1);
                self.len -= 1;

                if i == self.len {
                    return;
                }

                match self.heap[i].cmp(&old) {
                    Ordering::Less => self.heap_up(i),
                    Ordering::Greater => self.heap_down(i),
                    Ordering::Equal => {}
                }

                return;
            }
        }
    }

    pub fn is_scheduled(&self, event: SchedulerEvent) -> bool {
        self.scheduled_bits & event.as_bit() != 0
    }

    /// Advance towards `target`, stopping at the next due event.
    ///
    /// If an event has a deadline at or before `target`, the cycle counter is advanced to that
    /// deadline and the event is returned along with the cycles elapsed since the previous
    /// position. Otherwise the counter advances to `target` and no event is returned.
    ///
    /// The caller is expected to advance every active hardware unit by the elapsed delta and
    /// then dispatch the event, which may re-schedule itself or others.
    pub fn advance_to(&mut self, target: u64) -> (Option<SchedulerEvent>, u64) {
        debug_assert!(target >= self.cycles);

        if self.heap[0].cycles <= target {
            let HeapEntry { event, cycles, .. } = self.heap[0];
            self.heap.swap(0, self.len - 1);
            self.len -= 1;
            self.heap_down(0);
            self.scheduled_bits &= !event.as_bit();

            let elapsed = cycles - self.cycles;
            self.cycles = cycles;

            log::trace!("Popped event {event:?} at cycles {cycles}");

            (Some(event), elapsed)
        } else {
            let elapsed = target - self.cycles;
            self.cycles = target;
            (None, elapsed)
        }
    }

    fn heap_up(&mut self, mut i: usize) {
        while i != 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent] <= self.heap[i] {
                return;
            }

            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn heap_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.len {
                return;
            }
            let right = left + 1;

            if right < self.len
                && self.heap[right] < self.heap[left]
                && self.heap[right] < self.heap[i]
            {
                self.heap.swap(i, right);
                i = right;
            } else if self.heap[left] < self.heap[i] {
                self.heap.swap(i, left);
                i = left;
            } else {
                return;
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_until(scheduler: &mut Scheduler, target: u64) -> Vec<(SchedulerEvent, u64)> {
        let mut fired = Vec::new();
        loop {
            let (event, _) = scheduler.advance_to(target);
            match event {
                Some(event) => fired.push((event, scheduler.current())),
                None => break,
            }
        }
        fired
    }

    #[test]
    fn events_fire_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::ScuTimer1, 300);
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 100);
        scheduler.schedule_at(SchedulerEvent::Vdp1Commands, 200);

        let fired = drain_until(&mut scheduler, 1000);
        assert_eq!(
            fired,
            vec![
                (SchedulerEvent::VdpPhase, 100),
                (SchedulerEvent::Vdp1Commands, 200),
                (SchedulerEvent::ScuTimer1, 300),
            ]
        );
        assert_eq!(scheduler.current(), 1000);
    }

    #[test]
    fn same_cycle_ties_break_in_scheduling_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::ScuTimer1, 50);
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 50);
        scheduler.schedule_at(SchedulerEvent::Vdp1Commands, 50);

        let fired = drain_until(&mut scheduler, 50);
        assert_eq!(
            fired,
            vec![
                (SchedulerEvent::ScuTimer1, 50),
                (SchedulerEvent::VdpPhase, 50),
                (SchedulerEvent::Vdp1Commands, 50),
            ]
        );
    }

    #[test]
    fn rescheduling_replaces_the_deadline() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 100);
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 400);

        let fired = drain_until(&mut scheduler, 1000);
        assert_eq!(fired, vec![(SchedulerEvent::VdpPhase, 400)]);
    }

    #[test]
    fn cancelled_events_do_not_fire() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 100);
        scheduler.schedule_at(SchedulerEvent::ScuTimer1, 200);
        scheduler.cancel(SchedulerEvent::VdpPhase);

        let fired = drain_until(&mut scheduler, 1000);
        assert_eq!(fired, vec![(SchedulerEvent::ScuTimer1, 200)]);
        assert!(!scheduler.is_scheduled(SchedulerEvent::VdpPhase));
    }

    #[test]
    fn advance_stops_at_target_between_events() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 500);

        let (event, elapsed) = scheduler.advance_to(250);
        assert_eq!(event, None);
        assert_eq!(elapsed, 250);
        assert_eq!(scheduler.current(), 250);

        let (event, elapsed) = scheduler.advance_to(600);
        assert_eq!(event, Some(SchedulerEvent::VdpPhase));
        assert_eq!(elapsed, 250);
        assert_eq!(scheduler.current(), 500);
    }

    #[test]
    fn events_rescheduled_from_callbacks_fire_within_the_same_advance() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(SchedulerEvent::VdpPhase, 100);

        let (event, _) = scheduler.advance_to(1000);
        assert_eq!(event, Some(SchedulerEvent::VdpPhase));

        // Re-arm, as the phase handler does
        scheduler.schedule_from_now(SchedulerEvent::VdpPhase, 100);
        let (event, _) = scheduler.advance_to(1000);
        assert_eq!(event, Some(SchedulerEvent::VdpPhase));
        assert_eq!(scheduler.current(), 200);
    }
}
