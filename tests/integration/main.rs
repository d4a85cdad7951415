// Each file under tests/integration/ is a module of this single test crate.

mod mock_broker;

mod queue_test;
