pub mod ics;

pub use ics::agenda_to_ics;
