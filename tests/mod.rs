mod status_api;
mod smoke_tests;

// This file organizes the integration tests into a cohesive test suite.
// Each module tests a specific aspect of the application:
// - checkout_flow: Poll cycles against mocked calendar and device services
// - status_api: HTTP routes served over a mocked poller
// - smoke_tests: Config and feed parsing without any network access
