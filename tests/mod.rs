// Integration tests for dbmt
