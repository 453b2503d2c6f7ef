pub mod void_finder {
	pub mod info;
	pub mod error;
	pub mod geometry;
	pub mod grid_index;
	pub mod mask;
	pub mod lattice;
	pub mod config;
	pub mod classify;
	pub mod growth;
	pub mod reduce;
	pub mod checkpoint;
	pub mod scheduler;
	pub mod output;
	pub mod pipeline;
}
