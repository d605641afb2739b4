use alloy::sol;

sol! {
    #[derive(Debug)]
    contract D3MHelper {
        function shouldExec(address _direct, uint256 _threshold) external view returns (bool);
    }

    #[derive(Debug)]
    contract D3MHub {
        function exec() external;
    }
}
