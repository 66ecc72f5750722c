mod support;

mod watchdog;
