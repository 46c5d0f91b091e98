//! Integration tests: full screening runs against in-memory providers.

mod mock_providers;
