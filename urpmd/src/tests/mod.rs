mod api_tests;
mod freshness_http_tests;
