//! Uniswap V3 integration: on-chain quoting, router payloads, pool pricing.

use ethers::contract::abigen;

pub mod pricing;
pub mod quoter;

pub use pricing::PoolPriceOracle;
pub use quoter::UniswapQuoter;

abigen!(
    IQuoterV2,
    r#"[
        struct QuoteExactInputSingleParams { address tokenIn; address tokenOut; uint256 amountIn; uint24 fee; uint160 sqrtPriceLimitX96; }
        function quoteExactInputSingle(QuoteExactInputSingleParams memory params) external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate)
    ]"#,
);

abigen!(
    ISwapRouter02,
    r#"[
        struct ExactInputSingleParams { address tokenIn; address tokenOut; uint24 fee; address recipient; uint256 amountIn; uint256 amountOutMinimum; uint160 sqrtPriceLimitX96; }
        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut)
        function multicall(uint256 deadline, bytes[] data) external payable returns (bytes[] results)
    ]"#,
);

abigen!(
    UniswapV3Pool,
    r"[
        function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
    ]",
);
